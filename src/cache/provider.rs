//! Two-tier cache with integrated circuit breaker
//!
//! Reads consult the external tier first and fall back to the in-process map
//! on a miss or error. Writes go through to the external tier when it is
//! reachable and always land in the local map, so reads stay available
//! (staleness aside) while the external tier is down.
//!
//! Circuit breaker protection of the external tier is an internal detail: when
//! the circuit is open the external tier is skipped and the local map answers.

use super::errors::{CacheError, CacheResult};
use super::local::LocalCache;
use super::providers::{NoOpCacheService, PgCacheService};
use super::traits::{CacheService, CachedValue};
use crate::clock::{system_clock, Clock};
use crate::config::CacheConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// External tier backends with enum dispatch
#[derive(Debug, Clone)]
pub enum CacheBackend {
    /// Postgres table (boxed to keep the enum small)
    Postgres(Box<PgCacheService>),

    /// No external tier (always miss, always succeed)
    NoOp(NoOpCacheService),
}

impl CacheBackend {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }
}

impl CacheService for CacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        match self {
            Self::Postgres(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            Self::Postgres(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        match self {
            Self::Postgres(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Postgres(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Postgres(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }
}

/// Compose a calendar-scoped key: one entry per `namespace`, `key` and day
pub fn daily_key(namespace: &str, key: &str, date: NaiveDate) -> String {
    format!("{namespace}:{}:{key}", date.format("%Y-%m-%d"))
}

/// [`daily_key`] for the current UTC date
pub fn today_key(namespace: &str, key: &str) -> String {
    daily_key(namespace, key, Utc::now().date_naive())
}

/// Two-tier TTL cache over an external [`CacheService`]
#[derive(Clone)]
pub struct TwoTierCache<S: CacheService = CacheBackend> {
    external: S,
    local: LocalCache,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    default_ttl: Duration,
}

impl<S: CacheService + std::fmt::Debug> std::fmt::Debug for TwoTierCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("external", &self.external)
            .field("local_entries", &self.local.len())
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl TwoTierCache<CacheBackend> {
    /// Cache with no external tier; every read is served locally
    pub fn local_only(config: &CacheConfig) -> Self {
        Self::new(
            CacheBackend::NoOp(NoOpCacheService::new()),
            config,
            None,
            system_clock(),
        )
    }

    /// Cache whose external tier is the Postgres table
    pub fn postgres(
        service: PgCacheService,
        config: &CacheConfig,
        circuit_breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self::new(
            CacheBackend::Postgres(Box::new(service)),
            config,
            circuit_breaker,
            system_clock(),
        )
    }
}

impl<S: CacheService> TwoTierCache<S> {
    pub fn new(
        external: S,
        config: &CacheConfig,
        circuit_breaker: Option<Arc<CircuitBreaker>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let circuit_breaker = circuit_breaker.filter(|_| config.use_circuit_breaker);
        info!(
            provider = external.provider_name(),
            local_max_entries = config.local_max_entries,
            default_ttl_seconds = config.default_ttl_seconds,
            circuit_breaker = circuit_breaker.is_some(),
            "Two-tier cache initialized"
        );

        Self {
            external,
            local: LocalCache::with_clock(config.local_max_entries, clock),
            circuit_breaker,
            default_ttl: config.default_ttl(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.external.provider_name()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    /// Current circuit breaker state (for monitoring)
    ///
    /// Returns `None` if no circuit breaker guards the external tier.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// Run an external-tier operation through the breaker, mapping every failure to `None`
    async fn guarded<T, F, Fut>(&self, operation: &'static str, key: &str, call: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let outcome = match &self.circuit_breaker {
            Some(cb) => cb.call(call).await,
            None => call().await.map_err(CircuitBreakerError::OperationFailed),
        };

        match outcome {
            Ok(value) => Some(value),
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                debug!(key = key, operation = operation, "Cache circuit open, using local tier");
                None
            }
            Err(CircuitBreakerError::OperationFailed(error)) => {
                warn!(
                    key = key,
                    operation = operation,
                    provider = self.external.provider_name(),
                    error = %error,
                    "External cache tier failed, using local tier"
                );
                None
            }
        }
    }

    /// Get a value, preferring the external tier
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(Some(hit)) = self.guarded("get", key, || self.external.get(key)).await {
            if let Some(ttl_remaining) = hit.ttl_remaining {
                self.local.set(key, &hit.value, ttl_remaining);
            }
            return Some(hit.value);
        }

        self.local.get(key)
    }

    /// Store a value for `ttl` in both tiers
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.guarded("set", key, || self.external.set(key, value, ttl))
            .await;
        self.local.set(key, value, ttl);
    }

    /// Store a value for the configured default TTL
    pub async fn set_default(&self, key: &str, value: &str) {
        self.set(key, value, self.default_ttl).await;
    }

    /// Remove a key from both tiers
    pub async fn delete(&self, key: &str) {
        self.guarded("delete", key, || self.external.delete(key))
            .await;
        self.local.delete(key);
    }

    /// Get and deserialize a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize a value as JSON and store it for `ttl`
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let raw = serde_json::to_string(value).map_err(CacheError::from)?;
        self.set(key, &raw, ttl).await;
        Ok(())
    }

    /// Health of the external tier; an open circuit reports unhealthy
    pub async fn health_check(&self) -> bool {
        self.guarded("health_check", "", || self.external.health_check())
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde::Deserialize;

    fn config() -> CacheConfig {
        CacheConfig {
            default_ttl_seconds: 60,
            local_max_entries: 16,
            use_circuit_breaker: false,
        }
    }

    #[test]
    fn test_daily_key_is_calendar_scoped() {
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        assert_eq!(
            daily_key("digest", "user-42", monday),
            "digest:2024-03-04:user-42"
        );
        assert_ne!(
            daily_key("digest", "user-42", monday),
            daily_key("digest", "user-42", tuesday)
        );
    }

    #[tokio::test]
    async fn test_local_only_cache_expires() {
        let clock = ManualClock::new();
        let cache = TwoTierCache::new(
            CacheBackend::NoOp(NoOpCacheService::new()),
            &config(),
            None,
            Arc::new(clock.clone()),
        );

        cache.set("k", "v", Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        clock.advance(Duration::from_millis(1_001));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Quote {
            carrier: String,
            cents: u32,
        }

        let cache = TwoTierCache::local_only(&config());
        let quote = Quote {
            carrier: "usps".to_string(),
            cents: 73,
        };

        cache
            .set_json("quote", &quote, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(cache.get_json::<Quote>("quote").await.unwrap(), Some(quote));

        cache.set("broken", "{not json", Duration::from_secs(30)).await;
        assert!(matches!(
            cache.get_json::<Quote>("broken").await,
            Err(CacheError::SerializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_local_copy() {
        let cache = TwoTierCache::local_only(&config());
        cache.set_default("k", "v").await;
        cache.delete("k").await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.health_check().await);
    }
}
