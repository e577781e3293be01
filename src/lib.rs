//! Request gate: authentication for application routes and a rate-limited,
//! path-validated proxy for analytics ingestion.

pub mod allowlist;
pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ingress;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use config::Args;
pub use error::GateError;
pub use server::{build_state, create_router, start_server};
pub use state::AppState;
