//! Integration tests for rate limiting functionality

use record_ingest::ingest::rate_limit::{LimiterScope, LimiterScopeKind};
use record_ingest::ingest::RateLimiter;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_no_trailing_window_exceeds_limit_under_contention() {
    let limit = 5;
    let window = Duration::from_secs(1);
    let limiter = Arc::new(RateLimiter::new(limit, window));
    let admitted = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for _ in 0..23 {
        let limiter = limiter.clone();
        let admitted = admitted.clone();
        tasks.push(tokio::spawn(async move {
            limiter.acquire().await;
            admitted.lock().unwrap().push(Instant::now());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut admitted = admitted.lock().unwrap().clone();
    admitted.sort();
    assert_eq!(admitted.len(), 23);
    for i in 0..admitted.len() - limit as usize {
        let span = admitted[i + limit as usize] - admitted[i];
        assert!(
            span >= window,
            "calls {i} and {} were only {span:?} apart",
            i + limit as usize
        );
    }

    let stats = limiter.stats().await;
    assert_eq!(stats.total_admitted, 23);
    assert!(stats.in_window <= limit);
}

#[tokio::test(start_paused = true)]
async fn test_limit_plus_one_call_waits_for_window() {
    let limiter = RateLimiter::new(3, Duration::from_secs(10));
    let start = Instant::now();

    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_429_defers_admission_by_retry_after() {
    let limiter = RateLimiter::new(100, Duration::from_secs(60));
    limiter.acquire().await;

    let applied = limiter
        .notify_rate_limited(Some(Duration::from_millis(1500)))
        .await;
    assert_eq!(applied, Duration::from_millis(1500));

    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_millis(1500));

    let stats = limiter.stats().await;
    assert_eq!(stats.rate_limited, 1);
    // The window restarted, so only the post-429 call is in it.
    assert_eq!(stats.in_window, 1);
}

#[tokio::test(start_paused = true)]
async fn test_429_without_header_uses_default_delay() {
    let limiter =
        RateLimiter::new(10, Duration::from_secs(1)).with_default_retry_after(Duration::from_secs(2));
    let applied = limiter.notify_rate_limited(None).await;
    assert_eq!(applied, Duration::from_secs(2));

    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_shorter_retry_after_does_not_shorten_deferral() {
    let limiter = RateLimiter::new(10, Duration::from_secs(1));
    limiter.notify_rate_limited(Some(Duration::from_secs(5))).await;
    let applied = limiter.notify_rate_limited(Some(Duration::from_secs(1))).await;
    assert_eq!(applied, Duration::from_secs(5));
}

#[tokio::test]
async fn test_partition_scope_gives_independent_budgets() {
    let scope = LimiterScope::new(
        LimiterScopeKind::Partition,
        1,
        Duration::from_secs(60),
        Duration::from_secs(2),
    );
    let a = scope.limiter_for("a");
    let b = scope.limiter_for("b");
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &scope.limiter_for("a")));

    // Each partition's single slot is available immediately.
    tokio::time::timeout(Duration::from_secs(1), async {
        a.acquire().await;
        b.acquire().await;
    })
    .await
    .expect("independent budgets should not block each other");

    let global = LimiterScope::new(
        LimiterScopeKind::Global,
        1,
        Duration::from_secs(60),
        Duration::from_secs(2),
    );
    assert!(Arc::ptr_eq(&global.limiter_for("a"), &global.limiter_for("b")));
}
