//! Terminal rejections produced by the gate.
//!
//! Every variant renders as a JSON body of the form `{"error": "..."}`.
//! A missing identity is not an error here: the auth gate answers it with a
//! redirect.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Ingestion sub-path is not on the allowlist.
    #[error("invalid path")]
    InvalidPath,

    /// Request path can't be brought into canonical form.
    #[error("malformed path")]
    MalformedPath,

    /// No forwarded-for or real-ip header in hardened mode.
    #[error("missing address")]
    MissingCallerAddress,

    /// The caller's bucket is exhausted for the current window.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { limit: u32, reset_at: DateTime<Utc>, retry_after_secs: u64 },

    /// Identity resolved, but the access policy refused it.
    #[error("forbidden: {reason}")]
    Forbidden { status: StatusCode, reason: String },

    #[error("request body exceeds {limit} bytes")]
    RequestBodyTooLarge { limit: usize },

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPath => StatusCode::FORBIDDEN,
            Self::MalformedPath | Self::MissingCallerAddress => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden { status, .. } => *status,
            Self::RequestBodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used in logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::MalformedPath => "malformed_path",
            Self::MissingCallerAddress => "missing_address",
            Self::RateLimited { .. } => "rate_limited",
            Self::Forbidden { .. } => "forbidden",
            Self::RequestBodyTooLarge { .. } => "body_too_large",
            Self::Upstream(_) => "upstream_error",
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::RateLimited { limit, reset_at, retry_after_secs } => {
                let body = json!({ "error": "Too many requests", "retryAfter": retry_after_secs });
                let mut response = (status, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert("retry-after", HeaderValue::from(retry_after_secs));
                insert_rate_limit_headers(headers, limit, 0, reset_at);
                response
            }
            other => {
                let message = match other {
                    Self::InvalidPath => "Invalid path",
                    Self::MalformedPath => "Invalid request path",
                    Self::MissingCallerAddress => "Invalid request headers",
                    Self::Forbidden { .. } => "Forbidden",
                    Self::RequestBodyTooLarge { .. } => "Request body too large",
                    _ => "Bad gateway",
                };
                (status, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}

/// Writes the limit, remaining and reset (unix seconds) headers.
pub fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_at.timestamp()));
}
