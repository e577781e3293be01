//! Authentication gate for application routes.
//!
//! Classifies the route, resolves the caller's identity and decides:
//! public routes always pass, setup routes need an identity, protected
//! routes need an identity and must also pass the access policy. A missing
//! identity on a non-public route is answered with a redirect to sign-in.

mod routes;
mod session;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use tracing::debug;

pub use routes::{RouteClassification, RouteMatcher, RoutePattern};
pub use session::{SESSION_COOKIE, SessionTokenResolver, extract_assertion};

use crate::error::GateError;
use crate::metrics::AUTH_DECISIONS;

/// Verified user id of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns a request's identity assertion into a verified subject.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Subject>;
}

/// Resolves nobody. Used when no session secret is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

#[async_trait]
impl IdentityResolver for NoIdentity {
    async fn resolve(&self, _headers: &HeaderMap) -> Option<Subject> {
        None
    }
}

/// The stricter check protected routes run once an identity is known.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn authorize(&self, subject: &Subject, path: &str) -> Result<(), GateError>;
}

/// Any authenticated subject may use protected routes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAuthenticated;

#[async_trait]
impl AccessPolicy for AllowAuthenticated {
    async fn authorize(&self, _subject: &Subject, _path: &str) -> Result<(), GateError> {
        Ok(())
    }
}

/// Only the listed subjects may use protected routes.
#[derive(Debug, Clone, Default)]
pub struct SubjectAllowlist {
    subjects: HashSet<String>,
}

impl SubjectAllowlist {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { subjects: subjects.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl AccessPolicy for SubjectAllowlist {
    async fn authorize(&self, subject: &Subject, path: &str) -> Result<(), GateError> {
        if self.subjects.contains(subject.as_str()) {
            Ok(())
        } else {
            Err(GateError::Forbidden {
                status: StatusCode::FORBIDDEN,
                reason: format!("{subject} may not access {path}"),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Forward the request. `subject` is set whenever an identity resolved,
    /// on public routes too.
    Allow { classification: RouteClassification, subject: Option<Subject> },
    /// No identity on a non-public route.
    RedirectToSignIn { location: String },
    /// Identity resolved but the access policy refused it.
    Denied(GateError),
}

pub struct AuthGate {
    matcher: RouteMatcher,
    resolver: Arc<dyn IdentityResolver>,
    policy: Arc<dyn AccessPolicy>,
    sign_in_url: String,
}

impl AuthGate {
    pub fn new(
        matcher: RouteMatcher,
        resolver: Arc<dyn IdentityResolver>,
        policy: Arc<dyn AccessPolicy>,
        sign_in_url: impl Into<String>,
    ) -> Self {
        Self { matcher, resolver, policy, sign_in_url: sign_in_url.into() }
    }

    pub fn classify(&self, path: &str) -> RouteClassification {
        self.matcher.classify(path)
    }

    pub async fn check(&self, path: &str, headers: &HeaderMap) -> AuthOutcome {
        let classification = self.classify(path);
        let subject = self.resolver.resolve(headers).await;

        let outcome = match (classification, subject) {
            (RouteClassification::Public, subject) => AuthOutcome::Allow { classification, subject },
            (_, None) => AuthOutcome::RedirectToSignIn { location: self.sign_in_url.clone() },
            (RouteClassification::SetupOnly, subject) => {
                AuthOutcome::Allow { classification, subject }
            }
            (RouteClassification::Protected, Some(subject)) => {
                match self.policy.authorize(&subject, path).await {
                    Ok(()) => AuthOutcome::Allow { classification, subject: Some(subject) },
                    Err(err) => AuthOutcome::Denied(err),
                }
            }
        };

        let label = match &outcome {
            AuthOutcome::Allow { .. } => "allowed",
            AuthOutcome::RedirectToSignIn { .. } => "redirected",
            AuthOutcome::Denied(_) => "denied",
        };
        AUTH_DECISIONS.with_label_values(&[label]).inc();
        debug!(path, route = %classification, outcome = label, "auth gate decision");

        outcome
    }
}
