use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use k1s0_auth_session::{
    DistributedRateLimiter, InMemoryStore, KeyType, ManualClock, OutagePolicy, RateLimitConfig,
    RateLimitPolicies, RateLimiter,
};

#[tokio::test]
async fn test_login_scenario_for_single_ip() {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let limiter = DistributedRateLimiter::new(Arc::new(InMemoryStore::new())).with_clock(clock.clone());
    let config = RateLimitConfig::new("login", KeyType::Ip, 3, Duration::from_secs(60));

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let decision = limiter.check(&config, "1.2.3.4").await.unwrap();
        assert!(decision.allowed);
        remaining.push(decision.remaining);
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(remaining, vec![2, 1, 0]);

    let denied = limiter.check(&config, "1.2.3.4").await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after_secs(), Some(57));
    assert!(denied
        .headers()
        .contains(&("Retry-After", "57".to_string())));

    clock.set(Utc.timestamp_opt(1_700_000_061, 0).unwrap());
    let decision = limiter.check(&config, "1.2.3.4").await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_checks_never_over_admit() {
    let limiter = Arc::new(DistributedRateLimiter::new(Arc::new(InMemoryStore::new())));
    let config = RateLimitConfig::new("messaging", KeyType::User, 10, Duration::from_secs(60));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let limiter = limiter.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            limiter.check(&config, "user-1").await.unwrap().allowed
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn test_window_bound_holds_across_time() {
    let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
    let limiter = DistributedRateLimiter::new(Arc::new(InMemoryStore::new())).with_clock(clock.clone());
    let config = RateLimitConfig::new("matching", KeyType::User, 4, Duration::from_secs(10));

    // 0.5 秒刻みで 60 秒間叩き続け、任意の 10 秒区間の許可数が上限以下であることを確認する
    let mut admitted_at = Vec::new();
    for step in 0..120u64 {
        if limiter.check(&config, "user-1").await.unwrap().allowed {
            admitted_at.push(step * 500);
        }
        clock.advance(Duration::from_millis(500));
    }
    for (i, start) in admitted_at.iter().enumerate() {
        let in_window = admitted_at[i..]
            .iter()
            .take_while(|t| **t < start + 10_000)
            .count();
        assert!(in_window <= 4, "window starting at {start}ms admitted {in_window}");
    }
    assert!(admitted_at.len() >= 4 * 5);
}

#[tokio::test]
async fn test_key_types_have_separate_windows() {
    let limiter = RateLimiter::new(
        DistributedRateLimiter::new(Arc::new(InMemoryStore::new())),
        RateLimitPolicies::default(),
        OutagePolicy::FailClosed,
    );

    for _ in 0..5 {
        assert!(limiter.admit("auth", KeyType::Ip, "shared").await.unwrap().allowed);
    }
    assert!(!limiter.admit("auth", KeyType::Ip, "shared").await.unwrap().allowed);
    assert!(limiter.admit("auth", KeyType::Device, "shared").await.unwrap().allowed);
}

#[tokio::test(start_paused = true)]
async fn test_window_key_expires_after_window() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = DistributedRateLimiter::new(store.clone());
    let config = RateLimitConfig::new("auth", KeyType::Ip, 5, Duration::from_secs(60));

    limiter.check(&config, "1.2.3.4").await.unwrap();
    assert!(!store.is_empty().await);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(store.is_empty().await);
}
