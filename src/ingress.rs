//! Gate for traffic bound to the third-party collector.
//!
//! Two checks run in a fixed order and each can short-circuit: the path must
//! be on the allowlist, then the caller's bucket must have room. Evaluation
//! is synchronous, so the counter update can't be split by a suspension point.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, Uri, header::USER_AGENT};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tracing::{info, warn};

use crate::allowlist::{AllowedRoute, PathAllowlist};
use crate::clock::Clock;
use crate::error::GateError;
use crate::metrics::INGRESS_DECISIONS;
use crate::rate_limit::RateLimitStore;

pub const KEY_PREFIX: &str = "ratelimit:";
/// Bucket shared by every caller without an address in permissive mode.
pub const FALLBACK_KEY: &str = "ratelimit:unknown";

/// How the guard treats requests that carry no caller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Reject with 400.
    Hardened,
    /// Count against one strict shared bucket.
    Permissive,
}

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub mode: DeploymentMode,
    pub limit: u32,
    pub fallback_limit: u32,
    pub window: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Hardened,
            limit: 100,
            fallback_limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Quota state reported back to the caller on an allowed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not an ingestion path; the auth gate takes over.
    NotApplicable,
    Allow { route: AllowedRoute, quota: Quota },
    Deny(GateError),
}

pub struct IngressGuard {
    allowlist: PathAllowlist,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    config: IngressConfig,
}

impl IngressGuard {
    pub fn new(
        allowlist: PathAllowlist,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        config: IngressConfig,
    ) -> Self {
        Self { allowlist, store, clock, config }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.config.mode
    }

    pub fn evaluate(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Decision {
        let path = uri.path();
        if !self.allowlist.is_ingestion_path(path) {
            return Decision::NotApplicable;
        }

        let caller = caller_address(headers);
        let decision = self.decide(path, caller.as_deref());
        log_decision(&decision, self.clock.now(), method, path, caller.as_deref(), headers);
        decision
    }

    fn decide(&self, path: &str, caller: Option<&str>) -> Decision {
        let Some(route) = self.allowlist.resolve(path) else {
            return Decision::Deny(GateError::InvalidPath);
        };

        let (key, limit) = match caller {
            Some(address) => (format!("{KEY_PREFIX}{address}"), self.config.limit),
            None => match self.config.mode {
                DeploymentMode::Hardened => return Decision::Deny(GateError::MissingCallerAddress),
                DeploymentMode::Permissive => (FALLBACK_KEY.to_string(), self.config.fallback_limit),
            },
        };

        let outcome = self.store.check_and_increment(&key, self.config.window, limit);
        if !outcome.allowed {
            let retry_after_secs = retry_after_secs(outcome.reset_at, self.clock.now());
            return Decision::Deny(GateError::RateLimited {
                limit,
                reset_at: outcome.reset_at,
                retry_after_secs,
            });
        }

        Decision::Allow {
            route,
            quota: Quota { limit, remaining: outcome.remaining, reset_at: outcome.reset_at },
        }
    }
}

/// First `x-forwarded-for` entry, else `x-real-ip`.
pub fn caller_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(String::from)
}

// ceil((reset_at - now) / 1s), never below one second.
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

fn log_decision(
    decision: &Decision,
    now: DateTime<Utc>,
    method: &Method,
    path: &str,
    caller: Option<&str>,
    headers: &HeaderMap,
) {
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("-");
    let caller = caller.unwrap_or("-");
    let timestamp = now.to_rfc3339();

    match decision {
        Decision::NotApplicable => {}
        Decision::Allow { quota, .. } => {
            INGRESS_DECISIONS.with_label_values(&["allowed"]).inc();
            info!(
                %timestamp,
                status = 200u16,
                %method,
                path,
                caller,
                user_agent,
                remaining = quota.remaining,
                "ingestion request allowed"
            );
        }
        Decision::Deny(err) => {
            INGRESS_DECISIONS.with_label_values(&[err.reason()]).inc();
            warn!(
                %timestamp,
                status = err.status().as_u16(),
                %method,
                path,
                caller,
                user_agent,
                reason = err.reason(),
                "ingestion request rejected"
            );
        }
    }
}
