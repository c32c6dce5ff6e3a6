//! Two-tier cache: TTL expiry, local fallback and breaker protection

mod common;

use chrono::NaiveDate;
use common::FlakyCache;
use resilience_core::cache::{daily_key, TwoTierCache};
use resilience_core::clock::ManualClock;
use resilience_core::config::CacheConfig;
use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::sync::Arc;
use std::time::Duration;

fn cache_config(use_circuit_breaker: bool) -> CacheConfig {
    CacheConfig {
        default_ttl_seconds: 3600,
        local_max_entries: 128,
        use_circuit_breaker,
    }
}

fn cache_over(
    external: FlakyCache,
    breaker: Option<Arc<CircuitBreaker>>,
) -> (TwoTierCache<FlakyCache>, ManualClock) {
    let clock = ManualClock::new();
    let cache = TwoTierCache::new(
        external,
        &cache_config(breaker.is_some()),
        breaker,
        Arc::new(clock.clone()),
    );
    (cache, clock)
}

#[tokio::test]
async fn test_local_entry_expires_after_ttl() {
    let external = FlakyCache::new();
    external.set_failing(true);
    let (cache, clock) = cache_over(external, None);

    cache.set("geocode:10001", "40.75,-73.99", Duration::from_secs(1)).await;
    assert_eq!(
        cache.get("geocode:10001").await.as_deref(),
        Some("40.75,-73.99")
    );

    clock.advance(Duration::from_millis(1_100));
    assert_eq!(cache.get("geocode:10001").await, None);
    assert!(cache.local().is_empty());
}

#[tokio::test]
async fn test_external_failure_falls_back_to_local_copy() {
    let external = FlakyCache::new();
    let (cache, _clock) = cache_over(external.clone(), None);

    cache.set_default("rate:usps:ground", "7.35").await;
    assert_eq!(external.stored("rate:usps:ground").as_deref(), Some("7.35"));

    external.set_failing(true);
    assert_eq!(cache.get("rate:usps:ground").await.as_deref(), Some("7.35"));
    assert!(!cache.health_check().await);
}

#[tokio::test]
async fn test_external_hit_is_preferred() {
    let external = FlakyCache::new();
    let (cache, _clock) = cache_over(external.clone(), None);

    cache.set_default("greeting", "local").await;
    // Another process updated the external tier
    {
        use resilience_core::cache::CacheService;
        external
            .set("greeting", "remote", Duration::from_secs(60))
            .await
            .unwrap();
    }

    assert_eq!(cache.get("greeting").await.as_deref(), Some("remote"));
}

#[tokio::test]
async fn test_open_breaker_skips_external_tier() {
    let external = FlakyCache::new();
    let breaker = Arc::new(CircuitBreaker::new(
        "cache".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 2,
            timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_trials: None,
        },
    ));
    let (cache, _clock) = cache_over(external.clone(), Some(Arc::clone(&breaker)));

    external.set_failing(true);
    cache.set_default("digest:user-42", "sent").await;
    assert_eq!(cache.get("digest:user-42").await.as_deref(), Some("sent"));
    assert_eq!(cache.circuit_state(), Some(CircuitState::Open));

    let calls_when_opened = external.calls();
    for _ in 0..5 {
        assert_eq!(cache.get("digest:user-42").await.as_deref(), Some("sent"));
    }
    assert_eq!(external.calls(), calls_when_opened);
}

#[tokio::test]
async fn test_delete_clears_both_tiers() {
    let external = FlakyCache::new();
    let (cache, _clock) = cache_over(external.clone(), None);

    cache.set_default("session", "abc").await;
    cache.delete("session").await;

    assert_eq!(external.stored("session"), None);
    assert_eq!(cache.get("session").await, None);
}

#[tokio::test]
async fn test_daily_key_dedups_once_per_day() {
    let (cache, _clock) = cache_over(FlakyCache::new(), None);
    let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let tomorrow = today.succ_opt().unwrap();

    cache
        .set_default(&daily_key("digest", "user-42", today), "sent")
        .await;

    assert!(cache
        .get(&daily_key("digest", "user-42", today))
        .await
        .is_some());
    assert!(cache
        .get(&daily_key("digest", "user-42", tomorrow))
        .await
        .is_none());
}

#[tokio::test]
async fn test_unbounded_caller_ttl_is_stored() {
    let external = FlakyCache::new();
    let (cache, clock) = cache_over(external.clone(), None);

    cache
        .set_json("carrier:zones", &vec!["east", "west"], Duration::MAX)
        .await
        .unwrap();
    assert!(external.stored("carrier:zones").is_some());

    external.set_failing(true);
    clock.advance(Duration::from_secs(7 * 24 * 60 * 60));
    let zones: Option<Vec<String>> = cache.get_json("carrier:zones").await.unwrap();
    assert_eq!(zones, Some(vec!["east".to_string(), "west".to_string()]));
}
