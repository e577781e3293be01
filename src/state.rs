use std::sync::Arc;
use crate::auth::AuthGate;
use crate::ingress::IngressGuard;
use crate::proxy::Forwarder;
use crate::rate_limit::RateLimitStore;
// app's shared state

pub struct AppState {
    pub ingress: IngressGuard,
    pub auth: AuthGate,
    pub forwarder: Forwarder,
    pub app_upstream: String,              // where authenticated traffic goes
    pub rate_limits: Arc<dyn RateLimitStore>, // same store the guard writes, read by /health
}
