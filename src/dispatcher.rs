//! Entry point every gated request passes through.
//!
//! Ingestion paths are handled by the ingress guard alone and never reach
//! the auth gate. Everything else has its URI canonicalized, then goes
//! through the auth gate and, if allowed, on to the application handler
//! with that same canonical URI.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::auth::AuthOutcome;
use crate::error::insert_rate_limit_headers;
use crate::ingress::{Decision, caller_address};
use crate::proxy::{Audience, canonical_uri, set_subject_header};
use crate::state::AppState;

pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    match state.ingress.evaluate(req.method(), req.uri(), req.headers()) {
        Decision::Deny(err) => err.into_response(),
        Decision::Allow { route, quota } => {
            let url = route.url(req.uri().query());
            let mut response = match state.forwarder.forward(req, &url, Audience::ThirdParty).await
            {
                Ok(response) => response,
                Err(err) => err.into_response(),
            };
            insert_rate_limit_headers(
                response.headers_mut(),
                quota.limit,
                quota.remaining,
                quota.reset_at,
            );
            response
        }
        Decision::NotApplicable => authenticate(&state, req, next).await,
    }
}

async fn authenticate(state: &AppState, mut req: Request, next: Next) -> Response {
    match canonical_uri(req.uri()) {
        Ok(uri) => *req.uri_mut() = uri,
        Err(err) => {
            tracing::warn!(
                method = %req.method(),
                uri = %req.uri(),
                caller = caller_address(req.headers()).as_deref().unwrap_or("-"),
                reason = err.reason(),
                "request rejected"
            );
            return err.into_response();
        }
    }

    let path = req.uri().path().to_string();
    match state.auth.check(&path, req.headers()).await {
        AuthOutcome::Allow { subject, .. } => {
            set_subject_header(req.headers_mut(), subject.as_ref().map(|s| s.as_str()));
            if let Some(subject) = subject {
                req.extensions_mut().insert(subject);
            }
            next.run(req).await
        }
        AuthOutcome::RedirectToSignIn { location } => {
            Redirect::temporary(&location).into_response()
        }
        AuthOutcome::Denied(err) => {
            tracing::warn!(
                method = %req.method(),
                path = %path,
                caller = caller_address(req.headers()).as_deref().unwrap_or("-"),
                status = err.status().as_u16(),
                reason = err.reason(),
                "authenticated request denied"
            );
            err.into_response()
        }
    }
}
