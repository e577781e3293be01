mod health;
mod metrics;
mod forward;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use forward::forward_handler;
