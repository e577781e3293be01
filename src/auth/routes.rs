//! Route classification against static pattern lists.

use std::fmt;

/// Access class of a request path, derived once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClassification {
    Public,
    SetupOnly,
    Protected,
}

impl RouteClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::SetupOnly => "setup_only",
            Self::Protected => "protected",
        }
    }
}

impl fmt::Display for RouteClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single route pattern.
///
/// `"/pricing"` matches that path (trailing slash ignored); `"/sign-in*"`
/// matches every path starting with `/sign-in`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(normalize(pattern).to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => normalize(path) == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

// Strip one trailing slash but keep the root.
fn normalize(path: &str) -> &str {
    if path.len() > 1 { path.strip_suffix('/').unwrap_or(path) } else { path }
}

#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    public: Vec<RoutePattern>,
    setup: Vec<RoutePattern>,
}

impl RouteMatcher {
    pub fn new<P, S>(public: P, setup: S) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        Self {
            public: public.into_iter().map(|p| RoutePattern::parse(p.as_ref())).collect(),
            setup: setup.into_iter().map(|p| RoutePattern::parse(p.as_ref())).collect(),
        }
    }

    /// Public patterns win over setup patterns; anything else is protected.
    pub fn classify(&self, path: &str) -> RouteClassification {
        if self.public.iter().any(|p| p.matches(path)) {
            RouteClassification::Public
        } else if self.setup.iter().any(|p| p.matches(path)) {
            RouteClassification::SetupOnly
        } else {
            RouteClassification::Protected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> RouteMatcher {
        RouteMatcher::new(
            ["/", "/sign-in*", "/sign-up*", "/api/webhooks*", "/pricing"],
            ["/onboarding*", "/setup"],
        )
    }

    #[test]
    fn classify_public_routes() {
        let m = matcher();
        assert_eq!(m.classify("/"), RouteClassification::Public);
        assert_eq!(m.classify("/sign-in"), RouteClassification::Public);
        assert_eq!(m.classify("/sign-in/factor-two"), RouteClassification::Public);
        assert_eq!(m.classify("/api/webhooks/billing"), RouteClassification::Public);
        assert_eq!(m.classify("/pricing/"), RouteClassification::Public);
    }

    #[test]
    fn classify_setup_routes() {
        let m = matcher();
        assert_eq!(m.classify("/onboarding"), RouteClassification::SetupOnly);
        assert_eq!(m.classify("/onboarding/organization"), RouteClassification::SetupOnly);
        assert_eq!(m.classify("/setup/"), RouteClassification::SetupOnly);
    }

    #[test]
    fn everything_else_is_protected() {
        let m = matcher();
        for path in ["/dashboard", "/setup/extra", "/pricing/enterprise", "/api/channels"] {
            assert_eq!(m.classify(path), RouteClassification::Protected, "{path}");
        }
    }

    #[test]
    fn public_takes_precedence_over_setup() {
        let m = RouteMatcher::new(["/onboarding/welcome"], ["/onboarding*"]);
        assert_eq!(m.classify("/onboarding/welcome"), RouteClassification::Public);
        assert_eq!(m.classify("/onboarding/team"), RouteClassification::SetupOnly);
    }
}
