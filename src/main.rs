use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser; // for cli
use request_gate::clock::SystemClock;
use request_gate::{Args, build_state, start_server};
use tracing::info;

// this is main async function with tokio
#[tokio::main]
async fn main() -> Result<()> {
    // parse cli arguments (flags or environment)
    let args = Args::parse();
    init_tracing(args.log_json);

    let state = build_state(&args, Arc::new(SystemClock))?;
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid host/port")?;

    info!(
        app_upstream = %args.app_upstream,
        mode = ?args.mode,
        rate_limit = args.rate_limit,
        fallback_rate_limit = args.fallback_rate_limit,
        rate_window_secs = args.rate_window,
        ingest_prefix = %args.ingest_prefix,
        "configuration loaded"
    );

    start_server(state, addr).await
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,request_gate=debug,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
