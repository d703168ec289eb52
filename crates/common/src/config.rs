use serde::{Deserialize, Serialize};

use crate::error::{TixgateError, TixgateResult};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstreams: Vec<UpstreamConfig>,
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Vec<String>,
    /// Take the caller identity from the first `X-Forwarded-For` hop instead
    /// of the socket peer. Only enable behind a trusted load balancer.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen: default_admin_listen(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    pub servers: Vec<UpstreamServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    pub upstream: String,
    /// Per-route override of the global default policy.
    #[serde(default)]
    pub rate_limit: Option<PolicyConfig>,
}

impl RouteConfig {
    /// Whether this route handles a request for `host` and `path`.
    ///
    /// A route without a host matches any host.
    pub fn matches(&self, host: Option<&str>, path: &str) -> bool {
        route_matches(self.host.as_deref(), &self.path_prefix, host, path)
    }
}

/// Route matching shared by upstream selection and rate-limit policy lookup.
///
/// `route_host` of `None` matches any request host, including a missing one.
pub fn route_matches(
    route_host: Option<&str>,
    path_prefix: &str,
    host: Option<&str>,
    path: &str,
) -> bool {
    let host_match = match (route_host, host) {
        (Some(route_host), Some(req_host)) => req_host == route_host,
        (Some(_), None) => false,
        (None, _) => true,
    };

    host_match && path.starts_with(path_prefix)
}

/// A window length and request quota as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(alias = "ttl")]
    pub window_secs: u64,
    #[serde(alias = "limit")]
    pub quota: u64,
}

impl PolicyConfig {
    /// A policy with a zero window or zero quota cannot be enforced
    /// meaningfully and is replaced by the default wherever it appears.
    pub fn is_well_formed(&self) -> bool {
        self.window_secs > 0 && self.quota > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
    #[serde(default = "default_quota")]
    pub default_quota: u64,
    /// Seconds between sweeps of expired records; `0` disables the sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn default_policy(&self) -> PolicyConfig {
        PolicyConfig {
            window_secs: self.default_window_secs,
            quota: self.default_quota,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_window_secs: default_window_secs(),
            default_quota: default_quota(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

// Default value helpers
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_weight() -> u32 {
    1
}
fn default_path_prefix() -> String {
    "/".to_string()
}
fn default_window_secs() -> u64 {
    60
}
fn default_quota() -> u64 {
    100
}
fn default_sweep_interval() -> u64 {
    60
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency.
    ///
    /// Malformed rate-limit policies are not errors: they fall back to the
    /// default policy when the limiter is built.
    pub fn validate(&self) -> TixgateResult<()> {
        if self.server.listen.is_empty() {
            return Err(TixgateError::Config(
                "server.listen must have at least one address".into(),
            ));
        }

        for route in &self.routes {
            let upstream_exists = self.upstreams.iter().any(|u| u.name == route.upstream);
            if !upstream_exists {
                return Err(TixgateError::Config(format!(
                    "route references unknown upstream '{}' (host={:?}, path={})",
                    route.upstream, route.host, route.path_prefix
                )));
            }
            if let Some(policy) = route.rate_limit {
                if !policy.is_well_formed() {
                    tracing::warn!(
                        path = %route.path_prefix,
                        window_secs = policy.window_secs,
                        quota = policy.quota,
                        "malformed route rate limit, default policy will apply"
                    );
                }
            }
        }

        for upstream in &self.upstreams {
            if upstream.servers.is_empty() {
                return Err(TixgateError::Config(format!(
                    "upstream '{}' has no servers",
                    upstream.name
                )));
            }
        }

        Ok(())
    }

    /// Index of the first route, in declared order, that handles the request.
    pub fn find_route(&self, host: Option<&str>, path: &str) -> Option<usize> {
        self.routes.iter().position(|r| r.matches(host, path))
    }

    /// Settings that differ between `self` and `updated` but are only read
    /// at startup: listeners, upstreams, the route table apart from its
    /// rate-limit overrides, and the limiter's on/off switch and sweep.
    ///
    /// Empty when `updated` only touches rate-limit policies.
    pub fn restart_only_changes(&self, updated: &AppConfig) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if self.server != updated.server {
            changed.push("server");
        }
        if self.upstreams != updated.upstreams {
            changed.push("upstreams");
        }

        let same_routes = self.routes.len() == updated.routes.len()
            && self.routes.iter().zip(&updated.routes).all(|(old, new)| {
                old.host == new.host
                    && old.path_prefix == new.path_prefix
                    && old.upstream == new.upstream
            });
        if !same_routes {
            changed.push("routes");
        }

        if self.rate_limit.enabled != updated.rate_limit.enabled {
            changed.push("rate_limit.enabled");
        }
        if self.rate_limit.sweep_interval_secs != updated.rate_limit.sweep_interval_secs {
            changed.push("rate_limit.sweep_interval_secs");
        }

        changed
    }
}
