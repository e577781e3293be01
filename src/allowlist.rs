//! Static allowlist of collector endpoints reachable through the gate.
//!
//! Rules describe exact path shapes, never open wildcards, so the proxy can't
//! be used as a relay to arbitrary upstream paths.

/// Shape of the sub-path that follows a rule's prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathShape {
    /// Exactly this sub-path, with or without one trailing slash.
    Endpoint(String),
    /// `dir` followed by a single file-name segment with one of `extensions`.
    Asset { dir: String, extensions: Vec<String> },
}

impl PathShape {
    pub fn endpoint(path: impl Into<String>) -> Self {
        Self::Endpoint(path.into())
    }

    pub fn asset(dir: impl Into<String>, extensions: &[&str]) -> Self {
        Self::Asset {
            dir: dir.into(),
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
        }
    }

    fn matches(&self, sub_path: &str) -> bool {
        match self {
            Self::Endpoint(endpoint) => {
                sub_path == endpoint
                    || sub_path.strip_suffix('/').is_some_and(|trimmed| trimmed == endpoint)
            }
            Self::Asset { dir, extensions } => sub_path
                .strip_prefix(dir.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|file| is_asset_file(file, extensions)),
        }
    }
}

// One segment, conservative charset, no leading dot, known extension.
fn is_asset_file(file: &str, extensions: &[String]) -> bool {
    if file.is_empty() || file.starts_with('.') {
        return false;
    }
    if !file.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')) {
        return false;
    }
    extensions.iter().any(|ext| {
        file.strip_suffix(ext.as_str())
            .and_then(|stem| stem.strip_suffix('.'))
            .is_some_and(|stem| !stem.is_empty())
    })
}

/// One legitimate collector endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub prefix: String,
    pub shape: PathShape,
    /// Base URL requests matching this rule are forwarded to.
    pub upstream: String,
}

impl PathRule {
    pub fn new(prefix: impl Into<String>, shape: PathShape, upstream: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), shape, upstream: upstream.into() }
    }

    fn sub_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        strip_mount(path, &self.prefix)
    }
}

/// Where an allowed ingestion request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoute {
    pub upstream: String,
    /// Request path with the rule's prefix removed.
    pub upstream_path: String,
}

impl AllowedRoute {
    pub fn url(&self, query: Option<&str>) -> String {
        let base = self.upstream.trim_end_matches('/');
        match query {
            Some(query) if !query.is_empty() => format!("{base}{}?{query}", self.upstream_path),
            _ => format!("{base}{}", self.upstream_path),
        }
    }
}

/// Ordered, immutable rule set.
#[derive(Debug, Clone, Default)]
pub struct PathAllowlist {
    rules: Vec<PathRule>,
}

impl PathAllowlist {
    pub fn new(rules: Vec<PathRule>) -> Self {
        Self { rules }
    }

    /// Analytics collector layout: static assets go to the assets host,
    /// event and flag endpoints to the API host.
    pub fn analytics(prefix: &str, api_upstream: &str, assets_upstream: &str) -> Self {
        Self::analytics_mounts(prefix, prefix, api_upstream, assets_upstream)
    }

    /// Same layout with the static assets mounted under their own prefix.
    pub fn analytics_mounts(
        api_prefix: &str,
        assets_prefix: &str,
        api_upstream: &str,
        assets_upstream: &str,
    ) -> Self {
        let mut rules = vec![PathRule::new(
            assets_prefix,
            PathShape::asset("/static", &["js", "css", "map"]),
            assets_upstream,
        )];
        for endpoint in ["/decide", "/flags", "/e", "/i/v0/e", "/batch", "/capture"] {
            rules.push(PathRule::new(api_prefix, PathShape::endpoint(endpoint), api_upstream));
        }
        Self::new(rules)
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    /// Distinct rule prefixes, in rule order.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !prefixes.contains(&rule.prefix.as_str()) {
                prefixes.push(&rule.prefix);
            }
        }
        prefixes
    }

    /// True when `path` is the prefix itself or lives below one.
    pub fn is_ingestion_path(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.sub_path(path).is_some())
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// First rule matching `path`, turned into a forwarding target.
    pub fn resolve(&self, path: &str) -> Option<AllowedRoute> {
        self.rules.iter().find_map(|rule| {
            let sub_path = rule.sub_path(path)?;
            rule.shape.matches(sub_path).then(|| AllowedRoute {
                upstream: rule.upstream.clone(),
                upstream_path: sub_path.to_string(),
            })
        })
    }
}

// Prefix match on a segment boundary: "/ingest" mounts "/ingest/e", not "/ingestion".
fn strip_mount<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const API: &str = "https://collector.example.com";
    const ASSETS: &str = "https://assets.collector.example.com";

    fn allowlist() -> PathAllowlist {
        PathAllowlist::analytics("/ingest", API, ASSETS)
    }

    #[test]
    fn every_default_rule_has_a_matching_path() {
        let list = allowlist();
        for path in [
            "/ingest/static/array.js",
            "/ingest/static/recorder.js.map",
            "/ingest/decide",
            "/ingest/decide/",
            "/ingest/flags/",
            "/ingest/e/",
            "/ingest/i/v0/e/",
            "/ingest/batch",
            "/ingest/capture/",
        ] {
            assert!(list.is_allowed(path), "{path} should be allowed");
        }
    }

    #[test]
    fn near_misses_are_rejected() {
        let list = allowlist();
        for path in [
            "/ingest",
            "/ingest/",
            "/ingest/../secret",
            "/ingest/batch/extra",
            "/ingest/batch//",
            "/ingest/static/",
            "/ingest/static/.env",
            "/ingest/static/../array.js",
            "/ingest/static/nested/array.js",
            "/ingest/static/array.php",
            "/ingest/static/%2e%2e.js",
            "/ingestion/batch",
            "/other/batch",
            "/ingest/decide.php",
        ] {
            assert!(!list.is_allowed(path), "{path} should be rejected");
        }
    }

    #[test]
    fn ingestion_prefix_respects_segment_boundary() {
        let list = allowlist();
        assert!(list.is_ingestion_path("/ingest"));
        assert!(list.is_ingestion_path("/ingest/anything/at/all"));
        assert!(!list.is_ingestion_path("/ingestion"));
        assert!(!list.is_ingestion_path("/dashboard"));
    }

    #[test]
    fn resolve_routes_assets_and_events_to_their_hosts() {
        let list = allowlist();

        let asset = list.resolve("/ingest/static/array.js").unwrap();
        assert_eq!(asset.url(None), format!("{ASSETS}/static/array.js"));

        let event = list.resolve("/ingest/e/").unwrap();
        assert_eq!(event.url(Some("ip=1&ver=1.2")), format!("{API}/e/?ip=1&ver=1.2"));
    }

    #[test]
    fn assets_can_live_under_their_own_prefix() {
        let list = PathAllowlist::analytics_mounts("/ingest", "/ingest-assets", API, ASSETS);
        assert_eq!(list.prefixes(), vec!["/ingest-assets", "/ingest"]);

        let asset = list.resolve("/ingest-assets/static/array.js").unwrap();
        assert_eq!(asset.url(None), format!("{ASSETS}/static/array.js"));
        assert!(list.is_allowed("/ingest/batch"));
        assert!(!list.is_allowed("/ingest/static/array.js"));
        assert!(!list.is_allowed("/ingest-assets/batch"));
    }

    #[test]
    fn prefixes_are_deduplicated() {
        let mut rules = allowlist().rules().to_vec();
        rules.push(PathRule::new("/monitoring", PathShape::endpoint("/envelope"), API));
        let list = PathAllowlist::new(rules);
        assert_eq!(list.prefixes(), vec!["/ingest", "/monitoring"]);
        assert!(list.is_allowed("/monitoring/envelope"));
    }
}
