//! # Resilience Context
//!
//! Owns every stateful component of the layer (circuit breaker registry,
//! idempotency store, two-tier cache) so applications construct them once,
//! pass them by reference, and shut them down explicitly.

use crate::cache::{CacheBackend, NoOpCacheService, PgCacheService, TwoTierCache};
use crate::clock::{system_clock, Clock};
use crate::config::ResilienceConfig;
use crate::error::ResilienceResult;
use crate::idempotency::{
    IdempotencyLedger, IdempotencyStatus, IdempotencyStore, InMemoryLedger, PgIdempotencyLedger,
};
use crate::resilience::{CircuitBreakerManager, CircuitState, SystemCircuitBreakerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

/// Component name of the breaker guarding the external cache tier
pub const CACHE_COMPONENT: &str = "cache";

/// Serializable health snapshot of the whole layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub circuit_breakers: SystemCircuitBreakerStatus,
    pub unhealthy_circuits: Vec<String>,
    pub idempotency: IdempotencyStatus,
    pub idempotency_ledger_reachable: bool,
    pub cache_provider: String,
    pub cache_reachable: bool,
    pub cache_circuit: Option<CircuitState>,
    pub checked_at: DateTime<Utc>,
}

/// Owned registry, store and cache for one application
#[derive(Debug)]
pub struct ResilienceContext {
    config: ResilienceConfig,
    circuit_breakers: CircuitBreakerManager,
    idempotency: Arc<IdempotencyStore>,
    cache: TwoTierCache,
    pool: Option<PgPool>,
}

impl ResilienceContext {
    /// Postgres-backed context; creates the ledger and cache tables if missing
    pub async fn init(config: ResilienceConfig, pool: PgPool) -> ResilienceResult<Self> {
        config.validate()?;

        let ledger = PgIdempotencyLedger::new(pool.clone());
        ledger.ensure_schema().await?;
        let cache_service = PgCacheService::new(pool.clone());
        cache_service.ensure_schema().await?;

        let circuit_breakers = CircuitBreakerManager::from_config(&config.circuit_breakers);
        let cache_breaker = circuit_breakers.get_circuit_breaker(CACHE_COMPONENT);
        let cache = TwoTierCache::postgres(cache_service, &config.cache, Some(cache_breaker));
        let idempotency = Arc::new(IdempotencyStore::new(
            Arc::new(ledger),
            config.idempotency.clone(),
        ));

        info!(
            idempotency_backend = idempotency.backend_name(),
            cache_provider = cache.provider_name(),
            "Resilience context initialized"
        );

        Ok(Self {
            config,
            circuit_breakers,
            idempotency,
            cache,
            pool: Some(pool),
        })
    }

    /// Context without a database: in-memory ledger and local-only cache
    pub fn in_memory(config: ResilienceConfig) -> ResilienceResult<Self> {
        Self::with_components(config, Arc::new(InMemoryLedger::new()), system_clock())
    }

    /// Context over a caller-supplied ledger and clock
    pub fn with_components(
        config: ResilienceConfig,
        ledger: Arc<dyn IdempotencyLedger>,
        clock: Arc<dyn Clock>,
    ) -> ResilienceResult<Self> {
        config.validate()?;

        let circuit_breakers =
            CircuitBreakerManager::with_clock(&config.circuit_breakers, Arc::clone(&clock));
        let cache = TwoTierCache::new(
            CacheBackend::NoOp(NoOpCacheService::new()),
            &config.cache,
            None,
            Arc::clone(&clock),
        );
        let idempotency = Arc::new(IdempotencyStore::with_clock(
            ledger,
            config.idempotency.clone(),
            clock,
        ));

        info!(
            idempotency_backend = idempotency.backend_name(),
            cache_provider = cache.provider_name(),
            "Resilience context initialized"
        );

        Ok(Self {
            config,
            circuit_breakers,
            idempotency,
            cache,
            pool: None,
        })
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.circuit_breakers
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyStore> {
        &self.idempotency
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    /// Retry executor configured from the `retry` section
    pub fn retry_executor<E: std::fmt::Display>(&self) -> crate::resilience::RetryExecutor<E> {
        crate::resilience::RetryExecutor::new(self.config.retry.to_policy())
    }

    /// Probe the ledger and the external cache tier concurrently.
    ///
    /// An unreachable cache tier is reported but does not make the layer
    /// unhealthy, since reads fall back to the local tier.
    pub async fn health(&self) -> HealthReport {
        let circuit_breakers = self.circuit_breakers.system_status();
        let unhealthy_circuits: Vec<String> = circuit_breakers
            .unhealthy_circuits()
            .into_iter()
            .map(str::to_string)
            .collect();
        let idempotency = self.idempotency.status();
        let (idempotency_ledger_reachable, cache_reachable) =
            futures::join!(self.idempotency.health_check(), self.cache.health_check());

        HealthReport {
            healthy: unhealthy_circuits.is_empty()
                && idempotency.is_healthy()
                && idempotency_ledger_reachable,
            circuit_breakers,
            unhealthy_circuits,
            idempotency,
            idempotency_ledger_reachable,
            cache_provider: self.cache.provider_name().to_string(),
            cache_reachable,
            cache_circuit: self.cache.circuit_state(),
            checked_at: Utc::now(),
        }
    }

    /// Flush idempotency state, drop breakers and the local cache, close the pool
    pub async fn shutdown(self) {
        self.idempotency.shutdown().await;
        self.circuit_breakers.shutdown();
        self.cache.local().clear();
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        info!("Resilience context shut down");
    }
}
