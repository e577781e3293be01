use lazy_static::lazy_static;
use prometheus::{
    Gauge, Histogram, IntCounterVec, register_gauge, register_histogram, register_int_counter_vec,
};


lazy_static! {
    pub static ref INGRESS_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "gate_ingress_decisions_total",
        "Ingestion requests by gate outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref AUTH_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "gate_auth_decisions_total",
        "Application requests by auth gate outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref RATE_LIMIT_KEYS: Gauge =
        register_gauge!("gate_rate_limit_keys", "Live rate limit buckets").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "gate_upstream_latency_seconds",
        "Latency of forwarded requests in seconds"
    )
    .unwrap();
}
