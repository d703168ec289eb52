use std::time::Duration;

use tixgate_common::{route_matches, AppConfig, PolicyConfig};
use tracing::warn;

pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_QUOTA: u64 = 100;

/// Window length and request quota that apply to one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub quota: u64,
}

impl RateLimitPolicy {
    pub fn new(window_secs: u64, quota: u64) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            quota,
        }
    }

    /// Build a policy from its config form, or `None` if it is malformed.
    pub fn from_config(config: &PolicyConfig) -> Option<Self> {
        config
            .is_well_formed()
            .then(|| Self::new(config.window_secs, config.quota))
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS, DEFAULT_QUOTA)
    }
}

/// One entry of the route table: a matcher plus its optional override.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub host: Option<String>,
    pub path_prefix: String,
    pub policy: Option<RateLimitPolicy>,
}

impl RouteRule {
    /// Same matcher the gateway uses to pick the upstream for a request.
    pub fn matches(&self, host: Option<&str>, path: &str) -> bool {
        route_matches(self.host.as_deref(), &self.path_prefix, host, path)
    }
}

/// Maps an inbound request to the policy that governs it.
///
/// Routes are evaluated in declared order; the first match is the route
/// handler for the request. A handler without an override, or a request no
/// route handles, gets the default policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    default: RateLimitPolicy,
    routes: Vec<RouteRule>,
}

impl PolicyResolver {
    pub fn new(default: RateLimitPolicy) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// Append a route. Pass `None` for a route that uses the default policy.
    pub fn with_route(
        mut self,
        host: Option<&str>,
        path_prefix: &str,
        policy: Option<RateLimitPolicy>,
    ) -> Self {
        self.routes.push(RouteRule {
            host: host.map(str::to_string),
            path_prefix: path_prefix.to_string(),
            policy,
        });
        self
    }

    /// Build the route table from the gateway config.
    ///
    /// Malformed policies are replaced by the default (or, for the default
    /// itself, by the built-in 60s / 100 policy) and logged.
    pub fn from_config(config: &AppConfig) -> Self {
        let default_config = config.rate_limit.default_policy();
        let default = RateLimitPolicy::from_config(&default_config).unwrap_or_else(|| {
            warn!(
                window_secs = default_config.window_secs,
                quota = default_config.quota,
                "malformed default rate limit, using built-in policy"
            );
            RateLimitPolicy::default()
        });

        let routes = config
            .routes
            .iter()
            .map(|route| {
                let policy = route.rate_limit.and_then(|p| {
                    let parsed = RateLimitPolicy::from_config(&p);
                    if parsed.is_none() {
                        warn!(path = %route.path_prefix, "ignoring malformed route rate limit");
                    }
                    parsed
                });
                RouteRule {
                    host: route.host.clone(),
                    path_prefix: route.path_prefix.clone(),
                    policy,
                }
            })
            .collect();

        Self { default, routes }
    }

    pub fn resolve(&self, host: Option<&str>, path: &str) -> RateLimitPolicy {
        self.routes
            .iter()
            .find(|rule| rule.matches(host, path))
            .and_then(|rule| rule.policy)
            .unwrap_or(self.default)
    }

    pub fn default_policy(&self) -> RateLimitPolicy {
        self.default
    }

    pub fn routes(&self) -> &[RouteRule] {
        &self.routes
    }
}
