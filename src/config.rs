use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::http::HeaderValue;
use clap::Parser;

use crate::allowlist::PathAllowlist;
use crate::auth::RouteMatcher;
use crate::ingress::{DeploymentMode, IngressConfig};

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "request-gate")]
#[command(about = "Authentication gate and rate-limited collector proxy")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "GATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "GATE_PORT", default_value_t = 8080)]
    pub port: u16,

    // Application that authenticated traffic is forwarded to
    #[arg(long, env = "APP_UPSTREAM", default_value = "http://localhost:3000")]
    pub app_upstream: String,

    // hardened: reject ingestion requests without a caller address
    // permissive: count them against one shared strict bucket
    #[arg(long, env = "GATE_MODE", value_enum, default_value_t = DeploymentMode::Hardened)]
    pub mode: DeploymentMode,

    // Rate limit max requests per window and caller
    #[arg(long, env = "GATE_RATE_LIMIT", default_value_t = 100)]
    pub rate_limit: u32,

    // Limit of the shared bucket for callers without an address
    #[arg(long, env = "GATE_FALLBACK_RATE_LIMIT", default_value_t = 10)]
    pub fallback_rate_limit: u32,

    // Rate limit window in seconds
    #[arg(long, env = "GATE_RATE_WINDOW", default_value_t = 60)]
    pub rate_window: u64,

    // Minimum seconds between sweeps of expired buckets
    #[arg(long, env = "GATE_SWEEP_INTERVAL", default_value_t = 60)]
    pub sweep_interval: u64,

    // Path prefix the collector is mounted under
    #[arg(long, env = "INGEST_PREFIX", default_value = "/ingest")]
    pub ingest_prefix: String,

    // Separate mount for the collector's static assets (defaults to the ingest prefix)
    #[arg(long, env = "ASSETS_PREFIX")]
    pub assets_prefix: Option<String>,

    // Collector API host
    #[arg(long, env = "COLLECTOR_UPSTREAM", default_value = "https://us.i.posthog.com")]
    pub collector_upstream: String,

    // Collector static assets host
    #[arg(long, env = "COLLECTOR_ASSETS_UPSTREAM", default_value = "https://us-assets.i.posthog.com")]
    pub collector_assets_upstream: String,

    // Where unauthenticated browsers are sent
    #[arg(long, env = "SIGN_IN_URL", default_value = "/sign-in")]
    pub sign_in_url: String,

    // Routes reachable without identity ("/path" exact, "/path*" prefix)
    #[arg(
        long,
        env = "PUBLIC_ROUTES",
        value_delimiter = ',',
        default_values = ["/", "/sign-in*", "/sign-up*", "/api/webhooks*"]
    )]
    pub public_routes: Vec<String>,

    // Routes that need identity but skip the access policy
    #[arg(long, env = "SETUP_ROUTES", value_delimiter = ',', default_values = ["/onboarding*"])]
    pub setup_routes: Vec<String>,

    // Secret for verifying session tokens; without it nobody authenticates
    #[arg(long, env = "SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    // Restrict protected routes to these subjects (empty = any subject)
    #[arg(long, env = "ALLOWED_SUBJECTS", value_delimiter = ',')]
    pub allowed_subjects: Vec<String>,

    // Upstream request timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout: u64,

    // Largest request body forwarded upstream
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,

    // Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("port must be greater than 0");
        }
        if self.rate_limit == 0 || self.fallback_rate_limit == 0 {
            bail!("rate limits must be greater than 0");
        }
        if self.fallback_rate_limit > self.rate_limit {
            bail!("fallback_rate_limit cannot exceed rate_limit");
        }
        if self.rate_window == 0 {
            bail!("rate_window must be greater than 0");
        }
        if self.upstream_timeout == 0 {
            bail!("upstream_timeout must be greater than 0");
        }
        let prefixes = [
            ("ingest_prefix", Some(&self.ingest_prefix)),
            ("assets_prefix", self.assets_prefix.as_ref()),
        ];
        for (name, prefix) in prefixes.into_iter().filter_map(|(n, p)| p.map(|p| (n, p))) {
            if !prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty() {
                bail!("{name} must be a non-root path starting with '/'");
            }
        }
        for (name, url) in [
            ("app_upstream", &self.app_upstream),
            ("collector_upstream", &self.collector_upstream),
            ("collector_assets_upstream", &self.collector_assets_upstream),
        ] {
            reqwest::Url::parse(url).with_context(|| format!("{name} is not a valid URL: {url}"))?;
        }
        if self.sign_in_url.is_empty() || HeaderValue::from_str(&self.sign_in_url).is_err() {
            bail!("sign_in_url must be a non-empty header-safe URL");
        }
        for pattern in self.public_routes.iter().chain(&self.setup_routes) {
            if !pattern.trim().starts_with('/') {
                bail!("route pattern must start with '/': {pattern}");
            }
        }
        Ok(())
    }

    pub fn to_ingress_config(&self) -> IngressConfig {
        IngressConfig {
            mode: self.mode,
            limit: self.rate_limit,
            fallback_limit: self.fallback_rate_limit,
            window: Duration::from_secs(self.rate_window),
        }
    }

    pub fn to_allowlist(&self) -> PathAllowlist {
        let ingest_prefix = self.ingest_prefix.trim_end_matches('/');
        let assets_prefix =
            self.assets_prefix.as_deref().map_or(ingest_prefix, |p| p.trim_end_matches('/'));
        PathAllowlist::analytics_mounts(
            ingest_prefix,
            assets_prefix,
            &self.collector_upstream,
            &self.collector_assets_upstream,
        )
    }

    pub fn to_route_matcher(&self) -> RouteMatcher {
        RouteMatcher::new(&self.public_routes, &self.setup_routes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}
