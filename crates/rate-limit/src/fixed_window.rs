use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::policy::RateLimitPolicy;

/// Counting state for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests admitted in the current window.
    pub count: u64,
    /// Clock millis at which the window ends.
    pub reset_at: u64,
}

impl RateLimitRecord {
    fn fresh(now: u64, policy: &RateLimitPolicy) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(policy.window_millis()),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        now > self.reset_at
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected { retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Seconds until `reset_at`, rounded up.
pub fn retry_after_secs(reset_at: u64, now: u64) -> u64 {
    reset_at.saturating_sub(now).div_ceil(1000)
}

/// A concurrent fixed-window counter store.
///
/// Each key owns at most one [`RateLimitRecord`]. Expired records are
/// replaced lazily on the next request for the key; [`sweep`](Self::sweep)
/// evicts the ones nobody asks about again.
///
/// The window is fixed, not sliding: a client can land `quota` requests just
/// before a reset and another `quota` just after it.
#[derive(Debug, Default)]
pub struct FixedWindowStore {
    records: DashMap<String, RateLimitRecord>,
}

impl FixedWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a request for `key` at `now` is allowed under `policy`,
    /// updating the key's record.
    ///
    /// The entry guard holds the shard lock for the whole read-modify-write,
    /// so concurrent callers can never admit more than `quota` requests into
    /// one window.
    pub fn check(&self, key: &str, policy: &RateLimitPolicy, now: u64) -> Decision {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitRecord::fresh(now, policy));
                Decision::Allowed
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();

                if record.is_expired(now) {
                    *record = RateLimitRecord::fresh(now, policy);
                    return Decision::Allowed;
                }

                if record.count >= policy.quota {
                    return Decision::Rejected {
                        retry_after_secs: retry_after_secs(record.reset_at, now),
                    };
                }

                record.count += 1;
                Decision::Allowed
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<RateLimitRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Drop the record for `key`. Returns `true` if one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, RateLimitRecord)> {
        let mut entries: Vec<_> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Evict records whose window ended before `now`. Returns how many were
    /// removed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_key, record| !record.is_expired(now));
        let evicted = before.saturating_sub(self.records.len());

        tracing::debug!(
            evicted,
            remaining = self.records.len(),
            "fixed window sweep complete"
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(window_secs: u64, quota: u64) -> RateLimitPolicy {
        RateLimitPolicy::new(window_secs, quota)
    }

    #[test]
    fn allows_up_to_quota() {
        let store = FixedWindowStore::new();
        let p = policy(60, 3);

        for i in 0..3 {
            assert!(store.check("k", &p, 0).is_allowed(), "request {} should pass", i);
        }
        assert_eq!(
            store.check("k", &p, 0),
            Decision::Rejected {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn first_request_creates_record() {
        let store = FixedWindowStore::new();
        store.check("k", &policy(10, 5), 1_000);

        assert_eq!(
            store.get("k"),
            Some(RateLimitRecord {
                count: 1,
                reset_at: 11_000
            })
        );
    }

    #[test]
    fn rejection_leaves_record_unchanged() {
        let store = FixedWindowStore::new();
        let p = policy(10, 1);
        store.check("k", &p, 0);
        let before = store.get("k");

        assert!(!store.check("k", &p, 500).is_allowed());
        assert_eq!(store.get("k"), before);
    }

    #[test]
    fn boundary_is_inclusive() {
        let store = FixedWindowStore::new();
        let p = policy(1, 1);
        store.check("k", &p, 0);

        // now == reset_at is still inside the window.
        assert_eq!(
            store.check("k", &p, 1_000),
            Decision::Rejected {
                retry_after_secs: 0
            }
        );
        assert!(store.check("k", &p, 1_001).is_allowed());
        assert_eq!(store.get("k").map(|r| r.count), Some(1));
        assert_eq!(store.get("k").map(|r| r.reset_at), Some(2_001));
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(60_000, 0), 60);
        assert_eq!(retry_after_secs(60_000, 1), 60);
        assert_eq!(retry_after_secs(60_000, 999), 60);
        assert_eq!(retry_after_secs(60_000, 1_000), 59);
        assert_eq!(retry_after_secs(60_000, 59_999), 1);
        assert_eq!(retry_after_secs(60_000, 60_000), 0);
        assert_eq!(retry_after_secs(60_000, 70_000), 0);
    }

    #[test]
    fn sweep_evicts_expired_only() {
        let store = FixedWindowStore::new();
        store.check("short", &policy(1, 10), 0);
        store.check("long", &policy(60, 10), 0);

        assert_eq!(store.sweep(5_000), 1);
        assert!(store.get("short").is_none());
        assert!(store.get("long").is_some());
    }

    #[test]
    fn remove_and_snapshot() {
        let store = FixedWindowStore::new();
        let p = policy(60, 10);
        store.check("b", &p, 0);
        store.check("a", &p, 0);
        store.check("a", &p, 0);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, "a");
        assert_eq!(snapshot[0].1.count, 2);

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_checks_never_exceed_quota() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(FixedWindowStore::new());
        let admitted = Arc::new(AtomicU64::new(0));
        let p = policy(60, 50);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..25 {
                        if store.check("shared", &p, 0).is_allowed() {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(store.get("shared").map(|r| r.count), Some(50));
    }
}
