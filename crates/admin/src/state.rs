use std::sync::{Arc, RwLock};

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry};
use tixgate_common::AppConfig;
use tixgate_rate_limit::RateLimiter;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AppState>;

/// Central application state shared by the gateway and the admin API.
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub metrics: GatewayMetrics,
    /// `None` when rate limiting is disabled in the config.
    pub rate_limiter: Option<RateLimiter>,
    pub start_time: std::time::Instant,
}

/// Prometheus metrics collected by the gateway.
pub struct GatewayMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub rate_limited_total: IntCounter,
    pub request_duration: HistogramVec,
    pub rate_limit_keys: IntGauge,
}

impl GatewayMetrics {
    /// Create a new GatewayMetrics instance with every collector registered
    /// against a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "tixgate_requests_total",
            "Total number of requests received",
        ))
        .expect("failed to create requests_total counter");

        let rate_limited_total = IntCounter::with_opts(Opts::new(
            "tixgate_rate_limited_total",
            "Total number of requests rejected by the rate limiter",
        ))
        .expect("failed to create rate_limited_total counter");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "tixgate_request_duration_seconds",
                "Request processing duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["upstream"],
        )
        .expect("failed to create request_duration histogram");

        let rate_limit_keys = IntGauge::with_opts(Opts::new(
            "tixgate_rate_limit_keys",
            "Number of keys currently tracked by the rate limiter",
        ))
        .expect("failed to create rate_limit_keys gauge");

        registry.register(Box::new(requests_total.clone())).expect("failed to register requests_total");
        registry.register(Box::new(rate_limited_total.clone())).expect("failed to register rate_limited_total");
        registry.register(Box::new(request_duration.clone())).expect("failed to register request_duration");
        registry.register(Box::new(rate_limit_keys.clone())).expect("failed to register rate_limit_keys");

        Self {
            registry,
            requests_total,
            rate_limited_total,
            request_duration,
            rate_limit_keys,
        }
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Create a new AppState from the given configuration and limiter.
    pub fn new(config: AppConfig, rate_limiter: Option<RateLimiter>) -> Self {
        Self {
            config: RwLock::new(config),
            metrics: GatewayMetrics::new(),
            rate_limiter,
            start_time: std::time::Instant::now(),
        }
    }

    /// Number of keys the limiter tracks right now, also published to the
    /// `tixgate_rate_limit_keys` gauge.
    pub fn refresh_tracked_keys(&self) -> usize {
        let tracked = self
            .rate_limiter
            .as_ref()
            .map(RateLimiter::tracked_keys)
            .unwrap_or(0);
        self.metrics
            .rate_limit_keys
            .set(i64::try_from(tracked).unwrap_or(i64::MAX));
        tracked
    }
}
