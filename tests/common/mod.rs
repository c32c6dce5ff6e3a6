//! Shared test doubles: a ledger and a cache tier that can be switched into failure.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use proptest::prelude::*;
use resilience_core::cache::{CacheError, CacheResult, CacheService, CachedValue};
use resilience_core::idempotency::{
    IdempotencyError, IdempotencyLedger, IdempotencyRecord, IdempotencyResult, InMemoryLedger,
    ReserveOutcome,
};
use resilience_core::resilience::RetryPolicy;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory ledger whose every call fails while `set_failing(true)`
#[derive(Debug, Clone, Default)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    fn gate(&self) -> IdempotencyResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(IdempotencyError::DatabaseError(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyLedger for FlakyLedger {
    async fn find(&self, event_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        self.gate()?;
        self.inner.find(event_id).await
    }

    async fn reserve(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> IdempotencyResult<ReserveOutcome> {
        self.gate()?;
        self.inner.reserve(event_id, event_type, stale_after).await
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<IdempotencyRecord> {
        self.gate()?;
        self.inner.mark_processed(event_id, event_type, result).await
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<bool> {
        self.gate()?;
        self.inner.release(event_id).await
    }

    async fn health_check(&self) -> IdempotencyResult<bool> {
        self.gate()?;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// External cache tier that stores values without expiry and can be made to fail
#[derive(Debug, Clone, Default)]
pub struct FlakyCache {
    values: Arc<DashMap<String, String>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls that reached this tier
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|value| value.clone())
    }

    fn gate(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionError("cache unreachable".to_string()));
        }
        Ok(())
    }
}

impl CacheService for FlakyCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        self.gate()?;
        Ok(self
            .values
            .get(key)
            .map(|value| CachedValue::new(value.clone(), None)))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> CacheResult<()> {
        self.gate()?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.gate()?;
        self.values.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        self.gate()?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }
}

/// Policies with sane, bounded parameters
pub fn retry_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (
        1u32..10,
        1u64..5_000,
        1u64..120_000,
        1.0f64..4.0,
        0.0f64..=1.0,
    )
        .prop_map(
            |(max_attempts, base_ms, max_ms, exponential_base, jitter_fraction)| RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms.max(max_ms)),
                exponential_base,
                jitter_fraction,
            },
        )
}
