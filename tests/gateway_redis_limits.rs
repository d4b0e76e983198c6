#![cfg(all(feature = "gateway-store-redis", feature = "integration"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tutor_gateway::gateway::{
    Clock, LimitsConfig, RateLimitStore, RateLimiter, RedisRateLimitStore,
};

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn redis_url() -> Option<String> {
    env_nonempty("RATE_LIMIT_REDIS_URL").or_else(|| env_nonempty("REDIS_URL"))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

static PREFIX_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn test_prefix() -> String {
    let n = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tutor_test:{}:{n}", now_millis())
}

struct ManualClock(Arc<AtomicU64>);

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn redis_store_enforces_fixed_window_quota() {
    let Some(url) = redis_url() else {
        return;
    };

    let store = RedisRateLimitStore::new(url)
        .expect("store")
        .with_prefix(test_prefix());
    store.ping().await.expect("ping");

    let limiter = RateLimiter::new(Arc::new(store), LimitsConfig::default());
    for expected_remaining in (0..10).rev() {
        let decision = limiter.check("203.0.113.9").await.expect("check");
        assert!(decision.admitted);
        assert_eq!(decision.remaining, expected_remaining);
    }
    assert!(!limiter.check("203.0.113.9").await.expect("check").admitted);
    assert!(limiter.check("198.51.100.1").await.expect("check").admitted);
}

#[tokio::test]
async fn redis_store_starts_fresh_in_next_window() {
    let Some(url) = redis_url() else {
        return;
    };

    let time = Arc::new(AtomicU64::new(1_000));
    let store = RedisRateLimitStore::new(url)
        .expect("store")
        .with_prefix(test_prefix())
        .with_clock(Box::new(ManualClock(time.clone())));
    let limits = LimitsConfig {
        max_requests: 1,
        window_seconds: 60,
    };

    assert!(store.check_and_increment("a", &limits).await.expect("check").admitted);
    assert!(!store.check_and_increment("a", &limits).await.expect("check").admitted);

    time.store(1_060, Ordering::SeqCst);
    assert!(store.check_and_increment("a", &limits).await.expect("check").admitted);
}

#[tokio::test]
async fn concurrent_requests_never_exceed_quota() {
    let Some(url) = redis_url() else {
        return;
    };

    let store = RedisRateLimitStore::new(url)
        .expect("store")
        .with_prefix(test_prefix());
    let limiter = RateLimiter::new(Arc::new(store), LimitsConfig::default());

    let mut handles = Vec::new();
    for _ in 0..25 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check("192.0.2.44").await.expect("check").admitted
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.expect("join") {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}
