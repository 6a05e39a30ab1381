use pharma_gate::error::GateError;
use pharma_gate::rate_limit::{RateLimitPolicy, RateLimiter};
use pharma_gate::store::{MemoryStore, RateLimitStore};
use std::sync::Arc;

fn build_limiter(window_ms: u64, max_requests: u32) -> Arc<RateLimiter> {
    let store: Arc<dyn RateLimitStore> = Arc::new(MemoryStore::new());
    Arc::new(RateLimiter::new(RateLimitPolicy::new(window_ms, max_requests), store).unwrap())
}

#[tokio::test]
async fn test_end_to_end_window_scenario() {
    // windowMs = 60000, maxRequests = 2, evaluated at fixed instants
    let limiter = build_limiter(60_000, 2);
    let key = "rate_limit:/store/reviews:1.2.3.4";

    let first = limiter.check_at(key, 0).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);
    assert_eq!(first.reset_time, 60_000);

    let second = limiter.check_at(key, 10).await.unwrap();
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);
    assert_eq!(second.reset_time, 60_000);

    let third = limiter.check_at(key, 20).await.unwrap();
    assert!(!third.allowed);
    let retry_after_secs = (third.reset_time - 20).div_ceil(1000);
    assert_eq!(retry_after_secs, 60);

    // Past reset_time the window rolls forward and counting restarts
    let fourth = limiter.check_at(key, 61_000).await.unwrap();
    assert!(fourth.allowed);
    assert_eq!(fourth.remaining, 1);
    assert_eq!(fourth.reset_time, 121_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_admissions_stay_bounded() {
    const CONCURRENCY: u32 = 50;
    const MAX_REQUESTS: u32 = 10;

    let limiter = build_limiter(60_000, MAX_REQUESTS);
    let key = "rate_limit:/store/reviews:burst";

    let mut tasks = Vec::new();
    for _ in 0..CONCURRENCY {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move { limiter.check(key).await }));
    }

    let mut admitted = 0u32;
    let mut denied = 0u32;
    let mut contention_failures = 0u32;
    for outcome in futures::future::join_all(tasks).await {
        match outcome.unwrap() {
            Ok(decision) if decision.allowed => admitted += 1,
            Ok(_) => denied += 1,
            Err(GateError::ContentionExhausted(_)) => contention_failures += 1,
            Err(e) => panic!("unexpected limiter error: {}", e),
        }
    }

    assert_eq!(admitted + denied + contention_failures, CONCURRENCY);

    // The read-verify-write protocol is optimistic, not atomic: colliding
    // writers within the same few milliseconds can each observe the same
    // snapshot and both report admission. The overshoot stays small and does
    // not scale with the burst size.
    let overshoot = admitted.saturating_sub(MAX_REQUESTS);
    println!(
        "admitted={} denied={} contention_failures={} overshoot={}",
        admitted, denied, contention_failures, overshoot
    );
    assert!(admitted >= 1, "at least one request must be admitted");
    assert!(
        overshoot <= MAX_REQUESTS,
        "overshoot {} grew beyond the expected bound",
        overshoot
    );

    // Once the burst settles the key is exhausted for the rest of the window
    let settled = limiter.check(key).await.unwrap();
    assert!(!settled.allowed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_keys_do_not_interfere() {
    let limiter = build_limiter(60_000, 5);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move {
            let key = format!("rate_limit:/store/reviews:10.0.0.{}", i);
            limiter.check(&key).await
        }));
    }

    // One request per distinct key: everything is admitted
    for task in tasks {
        let decision = task.await.unwrap().unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }
}

#[tokio::test]
async fn test_refund_cycle_restores_full_window() {
    let limiter = build_limiter(60_000, 4);
    let key = "rate_limit:review_submission:cus_01HXYZ";

    let mut reset_time = 0;
    for _ in 0..4 {
        let decision = limiter.check_at(key, 500).await.unwrap();
        assert!(decision.allowed);
        reset_time = decision.reset_time;
    }
    assert!(!limiter.check_at(key, 600).await.unwrap().allowed);

    for _ in 0..4 {
        limiter.refund_at(key, reset_time, 650).await;
    }

    let decision = limiter.check_at(key, 700).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 3);
}

#[tokio::test]
async fn test_refund_from_previous_window_is_rejected() {
    let limiter = build_limiter(60_000, 2);
    let key = "rate_limit:review_submission:cus_01HXYZ";

    let stale = limiter.check_at(key, 0).await.unwrap();
    assert_eq!(stale.reset_time, 60_000);

    // Roll into the next window and consume a slot there
    let fresh = limiter.check_at(key, 70_000).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.reset_time, 130_000);

    // A refund captured in the old window must not release the new slot
    limiter.refund_at(key, stale.reset_time, 70_500).await;

    let decision = limiter.check_at(key, 71_000).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 0);
}
