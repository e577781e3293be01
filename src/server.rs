//! Router assembly, state construction and serving.
//!
//! `/health` and `/metrics` sit beside the gate. Every other path falls
//! through to a router whose only handler forwards to the application,
//! wrapped in the [`dispatch`] middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{
    AccessPolicy, AllowAuthenticated, AuthGate, IdentityResolver, NoIdentity,
    SessionTokenResolver, SubjectAllowlist,
};
use crate::clock::Clock;
use crate::config::Args;
use crate::dispatcher::dispatch;
use crate::handlers;
use crate::ingress::IngressGuard;
use crate::proxy::Forwarder;
use crate::rate_limit::{InMemoryRateLimitStore, RateLimitStore};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .fallback(handlers::forward_handler)
        .layer(middleware::from_fn_with_state(state.clone(), dispatch))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
        .fallback_service(gated)
        .layer(TraceLayer::new_for_http())
}

/// Builds the shared state from validated arguments.
pub fn build_state(args: &Args, clock: Arc<dyn Clock>) -> Result<Arc<AppState>> {
    args.validate()?;

    let store: Arc<dyn RateLimitStore> =
        Arc::new(InMemoryRateLimitStore::new(clock.clone(), args.sweep_interval()));

    let ingress =
        IngressGuard::new(args.to_allowlist(), store.clone(), clock.clone(), args.to_ingress_config());

    let resolver: Arc<dyn IdentityResolver> = match &args.session_secret {
        Some(secret) if !secret.is_empty() => {
            Arc::new(SessionTokenResolver::new(secret.as_bytes(), clock))
        }
        _ => {
            warn!("no session secret configured, every non-public route will redirect to sign-in");
            Arc::new(NoIdentity)
        }
    };
    let policy: Arc<dyn AccessPolicy> = if args.allowed_subjects.is_empty() {
        Arc::new(AllowAuthenticated)
    } else {
        Arc::new(SubjectAllowlist::new(args.allowed_subjects.iter().cloned()))
    };
    let auth = AuthGate::new(args.to_route_matcher(), resolver, policy, args.sign_in_url.clone());

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("failed to build HTTP client")?;
    let forwarder = Forwarder::new(client, args.upstream_timeout(), args.max_body_bytes);

    Ok(Arc::new(AppState {
        ingress,
        auth,
        forwarder,
        app_upstream: args.app_upstream.clone(),
        rate_limits: store,
    }))
}

/// Serves until Ctrl+C or SIGTERM.
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "gate listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
