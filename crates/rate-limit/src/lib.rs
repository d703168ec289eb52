//! Per-caller, per-route request limiting for tixgate.
//!
//! The limiter is a fixed-window counter: every key gets a record holding a
//! request count and the instant its window ends. The first request of a
//! window creates the record, later requests increment it until the quota is
//! reached, and anything past the quota is rejected with a retry-after hint
//! until the window ends. Expired records are replaced on the next request
//! for their key.
//!
//! A key is the caller identity and the request path joined with `:`. The
//! quota and window come from the route's policy, or the global default.
//!
//! Build one [`RateLimiter`] per process and hand clones of it to every
//! request path; clones share the same store.

pub mod clock;
pub mod fixed_window;
pub mod policy;

use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use tixgate_common::{TixgateError, TixgateResult};

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use fixed_window::{retry_after_secs, Decision, FixedWindowStore, RateLimitRecord};
pub use policy::{PolicyResolver, RateLimitPolicy, RouteRule, DEFAULT_QUOTA, DEFAULT_WINDOW_SECS};

/// Build the store key for a caller and request path.
pub fn rate_limit_key(client: &str, path: &str) -> String {
    format!("{}:{}", client, path)
}

/// A fixed-window rate limiter with a hot-swappable policy table.
///
/// Cheaply cloneable (backed by `Arc`) and safe to share across tasks and
/// threads.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    policies: ArcSwap<PolicyResolver>,
    store: FixedWindowStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter driven by the monotonic clock.
    pub fn new(resolver: PolicyResolver) -> Self {
        Self::with_clock(resolver, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(resolver: PolicyResolver, clock: Arc<dyn Clock>) -> Self {
        let default = resolver.default_policy();
        tracing::info!(
            window_secs = default.window_secs(),
            quota = default.quota,
            routes = resolver.routes().len(),
            "creating fixed window rate limiter"
        );
        Self {
            inner: Arc::new(RateLimiterInner {
                policies: ArcSwap::from_pointee(resolver),
                store: FixedWindowStore::new(),
                clock,
            }),
        }
    }

    /// Check a request from `client` for `path`, counting it if allowed.
    pub fn check(&self, client: &str, host: Option<&str>, path: &str) -> Decision {
        let policy = self.inner.policies.load().resolve(host, path);
        let key = rate_limit_key(client, path);
        let decision = self.check_key(&key, &policy);

        if let Decision::Rejected { retry_after_secs } = decision {
            tracing::debug!(
                key = %key,
                quota = policy.quota,
                window_secs = policy.window_secs(),
                retry_after_secs,
                "quota exhausted"
            );
        }
        decision
    }

    /// Check a pre-built key against an explicit policy.
    pub fn check_key(&self, key: &str, policy: &RateLimitPolicy) -> Decision {
        let now = self.inner.clock.now_millis();
        self.inner.store.check(key, policy, now)
    }

    /// Like [`check`](Self::check), but turns a rejection into
    /// [`TixgateError::RateLimited`].
    pub fn enforce(&self, client: &str, host: Option<&str>, path: &str) -> TixgateResult<()> {
        match self.check(client, host, path) {
            Decision::Allowed => Ok(()),
            Decision::Rejected { retry_after_secs } => Err(TixgateError::RateLimited {
                key: rate_limit_key(client, path),
                retry_after_secs,
            }),
        }
    }

    /// Atomically replace the policy table.
    ///
    /// Records already in the store keep their window end; the new policy
    /// applies to quota checks immediately and to windows opened from now on.
    pub fn reload(&self, resolver: PolicyResolver) {
        let default = resolver.default_policy();
        self.inner.policies.store(Arc::new(resolver));
        tracing::info!(
            window_secs = default.window_secs(),
            quota = default.quota,
            "rate limit policies reloaded"
        );
    }

    pub fn policies(&self) -> Arc<PolicyResolver> {
        self.inner.policies.load_full()
    }

    /// Current clock reading, in the same unit as [`RateLimitRecord::reset_at`].
    pub fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.store.len()
    }

    pub fn get(&self, key: &str) -> Option<RateLimitRecord> {
        self.inner.store.get(key)
    }

    pub fn snapshot(&self) -> Vec<(String, RateLimitRecord)> {
        self.inner.store.snapshot()
    }

    /// Forget a key's window so its next request starts fresh.
    pub fn reset_key(&self, key: &str) -> bool {
        let removed = self.inner.store.remove(key);
        if removed {
            tracing::info!(key = %key, "rate limit key reset");
        }
        removed
    }

    /// Evict every expired record now.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    /// Spawn a background thread that sweeps expired records every
    /// `interval`.
    ///
    /// The thread only holds a weak handle and exits once every clone of the
    /// limiter has been dropped.
    pub fn start_sweep_task(&self, interval: Duration) -> std::io::Result<()> {
        let inner: Weak<RateLimiterInner> = Arc::downgrade(&self.inner);

        std::thread::Builder::new()
            .name("rate-limit-sweep".into())
            .spawn(move || loop {
                std::thread::sleep(interval);

                let Some(limiter) = inner.upgrade() else {
                    tracing::debug!("rate limiter dropped, sweep thread exiting");
                    break;
                };
                limiter.sweep();
                tracing::trace!("rate limiter sweep tick completed");
            })?;

        Ok(())
    }
}

impl RateLimiterInner {
    fn sweep(&self) -> usize {
        self.store.sweep(self.clock.now_millis())
    }
}
