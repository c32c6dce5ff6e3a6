//! No-op cache provider
//!
//! Always returns None/success. Used when no external tier is configured, in
//! which case the two-tier cache serves entirely from its local map.

use crate::cache::errors::CacheResult;
use crate::cache::traits::{CacheService, CachedValue};
use std::time::Duration;

/// No-op cache service that never caches anything
///
/// All reads return None, all writes succeed silently.
#[derive(Debug, Clone, Default)]
pub struct NoOpCacheService;

impl NoOpCacheService {
    /// Create a new no-op cache service
    pub fn new() -> Self {
        Self
    }
}

impl CacheService for NoOpCacheService {
    async fn get(&self, _key: &str) -> CacheResult<Option<CachedValue>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}
