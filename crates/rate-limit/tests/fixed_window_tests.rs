use std::sync::Arc;
use std::time::Duration;

use tixgate_rate_limit::{
    Decision, ManualClock, PolicyResolver, RateLimitPolicy, RateLimiter,
};

const CLIENT: &str = "203.0.113.7";

fn limiter(resolver: PolicyResolver) -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    (RateLimiter::with_clock(resolver, clock.clone()), clock)
}

fn retry_after(decision: Decision) -> u64 {
    match decision {
        Decision::Rejected { retry_after_secs } => retry_after_secs,
        Decision::Allowed => panic!("expected a rejection"),
    }
}

#[test]
fn test_quota_plus_one_is_rejected() {
    let (limiter, clock) = limiter(PolicyResolver::new(RateLimitPolicy::new(10, 4)));

    for _ in 0..4 {
        assert!(limiter.check(CLIENT, None, "/api/events").is_allowed());
        clock.advance(Duration::from_millis(100));
    }

    assert!(!limiter.check(CLIENT, None, "/api/events").is_allowed());
}

#[test]
fn test_window_reset_starts_fresh() {
    let (limiter, clock) = limiter(PolicyResolver::new(RateLimitPolicy::new(5, 2)));

    limiter.check(CLIENT, None, "/api/tickets");
    limiter.check(CLIENT, None, "/api/tickets");
    assert!(!limiter.check(CLIENT, None, "/api/tickets").is_allowed());

    clock.advance(Duration::from_millis(5_001));

    assert!(limiter.check(CLIENT, None, "/api/tickets").is_allowed());
    let record = limiter.get("203.0.113.7:/api/tickets").unwrap();
    assert_eq!(record.count, 1);
    assert_eq!(record.reset_at, limiter.now_millis() + 5_000);
}

#[test]
fn test_exhausting_one_key_leaves_others_alone() {
    let (limiter, _clock) = limiter(PolicyResolver::new(RateLimitPolicy::new(60, 1)));

    assert!(limiter.check("client-a", None, "/api/events").is_allowed());
    assert!(!limiter.check("client-a", None, "/api/events").is_allowed());

    assert!(limiter.check("client-b", None, "/api/events").is_allowed());
}

#[test]
fn test_retry_after_is_bounded_and_non_increasing() {
    let (limiter, clock) = limiter(PolicyResolver::new(RateLimitPolicy::new(10, 1)));
    limiter.check(CLIENT, None, "/api/marketplace");

    let mut previous = u64::MAX;
    for _ in 0..25 {
        let secs = retry_after(limiter.check(CLIENT, None, "/api/marketplace"));
        assert!(secs <= 10, "retry_after {} outside window", secs);
        assert!(secs <= previous, "retry_after went up: {} -> {}", previous, secs);
        previous = secs;
        clock.advance(Duration::from_millis(400));
    }
}

#[test]
fn test_route_override_beats_default() {
    let resolver = PolicyResolver::default().with_route(
        None,
        "/api/marketplace/purchase",
        Some(RateLimitPolicy::new(10, 5)),
    );
    let (limiter, clock) = limiter(resolver);

    for _ in 0..5 {
        assert!(limiter
            .check(CLIENT, None, "/api/marketplace/purchase")
            .is_allowed());
        clock.advance(Duration::from_secs(1));
    }

    // Well under the default quota of 100, but over the route's 5.
    assert!(!limiter
        .check(CLIENT, None, "/api/marketplace/purchase")
        .is_allowed());

    // Other routes still use the default.
    assert!(limiter.check(CLIENT, None, "/api/events").is_allowed());
}

#[test]
fn test_default_policy_scenario() {
    let (limiter, clock) = limiter(PolicyResolver::default());

    for i in 0..100 {
        assert!(
            limiter.check(CLIENT, None, "/api/events").is_allowed(),
            "request {} should pass",
            i
        );
        clock.advance(Duration::from_millis(9));
    }

    let secs = retry_after(limiter.check(CLIENT, None, "/api/events"));
    assert!((59..=60).contains(&secs), "retry_after was {}", secs);
}

#[test]
fn test_boundary_burst_is_preserved() {
    let (limiter, clock) = limiter(PolicyResolver::new(RateLimitPolicy::new(1, 3)));

    // Open the window, wait until just before it ends, then burst.
    assert!(limiter.check(CLIENT, None, "/").is_allowed());
    clock.advance(Duration::from_millis(990));
    assert!(limiter.check(CLIENT, None, "/").is_allowed());
    assert!(limiter.check(CLIENT, None, "/").is_allowed());

    clock.advance(Duration::from_millis(20));
    for _ in 0..3 {
        assert!(limiter.check(CLIENT, None, "/").is_allowed());
    }
    assert!(!limiter.check(CLIENT, None, "/").is_allowed());
}
