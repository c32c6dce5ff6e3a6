//! Cache service trait definition

use super::errors::CacheResult;
use std::time::Duration;

/// A value read from an external cache tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,

    /// Time left before the external tier expires the entry, when the backend reports it
    pub ttl_remaining: Option<Duration>,
}

impl CachedValue {
    pub fn new(value: impl Into<String>, ttl_remaining: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            ttl_remaining,
        }
    }
}

/// Trait defining external cache tier operations
///
/// Implemented by concrete cache providers (Postgres, NoOp).
/// All operations are async and return `CacheResult` for error handling.
pub trait CacheService: Send + Sync {
    /// Get a value from the cache by key
    ///
    /// Returns `Ok(Some(value))` on a hit within TTL, `Ok(None)` on a miss.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<CachedValue>>> + Send;

    /// Set a value in the cache with a TTL
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Delete a specific key from the cache
    fn delete(&self, key: &str) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    /// Check if the cache backend is healthy
    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    /// Get the name of the cache provider
    fn provider_name(&self) -> &'static str;
}
