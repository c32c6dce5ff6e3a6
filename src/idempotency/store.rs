//! # Idempotency Store
//!
//! At-most-once processing of inbound events, keyed by `event_id`.
//!
//! ## Tiers
//!
//! ```text
//! IdempotencyStore
//!   ├── ledger: Arc<dyn IdempotencyLedger>   <- durable, atomic per event_id
//!   └── fallback: FallbackLedger             <- bounded in-process map, outage only
//! ```
//!
//! While the ledger answers, every decision is made there and the guarantee is
//! strict. When a ledger call fails the store enters degraded mode and serves
//! the same call from the fallback map; dedup is then best-effort, bounded by
//! the fallback TTL and the process lifetime. The first successful ledger call
//! afterwards leaves degraded mode and promotes processed fallback markers to
//! the ledger. A reservation taken in the fallback during the outage keeps the
//! event in progress after recovery until its holder commits or releases it, or
//! the reservation goes stale.
//!
//! With the fallback disabled the store fails closed: ledger errors surface as
//! [`IdempotencyError::Unavailable`] and callers must not run the side effect.
//!
//! ```rust
//! use resilience_core::config::IdempotencyConfig;
//! use resilience_core::idempotency::{IdempotencyStore, InMemoryLedger, RunOnce};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = IdempotencyStore::new(Arc::new(InMemoryLedger::new()), IdempotencyConfig::default());
//!
//! let first = store
//!     .run_once("evt_1", "payment.succeeded", || async { Ok::<_, String>("order_paid") })
//!     .await;
//! assert!(matches!(first, Ok(RunOnce::Executed("order_paid"))));
//!
//! let redelivery = store
//!     .run_once("evt_1", "payment.succeeded", || async { Ok::<_, String>("order_paid") })
//!     .await;
//! assert!(matches!(redelivery, Ok(RunOnce::Duplicate { .. })));
//! # });
//! ```

use super::errors::{IdempotencyError, IdempotencyResult};
use super::fallback::FallbackLedger;
use super::ledger::IdempotencyLedger;
use super::record::{ProcessedState, Reservation};
use crate::clock::{system_clock, Clock};
use crate::config::IdempotencyConfig;
use crate::logging::{log_degraded_operation, log_error, log_idempotency_operation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Which tier is currently answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// Durable ledger reachable; at-most-once is guaranteed
    Normal,
    /// Durable ledger failing; dedup is best-effort via the fallback map
    Degraded,
}

/// Serializable snapshot of the store for health endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyStatus {
    pub mode: StoreMode,
    pub backend: String,
    pub fallback_enabled: bool,
    pub fallback_entries: usize,
    pub fallback_max_entries: usize,
    pub fallback_ttl: Duration,
    pub durable_failures: u64,
    pub fallback_operations: u64,
    pub promoted_records: u64,
    pub last_durable_error: Option<String>,
}

impl IdempotencyStatus {
    pub fn is_healthy(&self) -> bool {
        self.mode == StoreMode::Normal
    }
}

/// Outcome of [`IdempotencyStore::run_once`]
#[derive(Debug, Clone, PartialEq)]
pub enum RunOnce<T> {
    /// This call ran the side effect and committed its result
    Executed(T),
    /// The event was already processed; the stored result is returned instead
    Duplicate { result: Option<Value> },
    /// Another handler is processing the event right now
    InProgress,
}

impl<T> RunOnce<T> {
    pub fn was_executed(&self) -> bool {
        matches!(self, RunOnce::Executed(_))
    }
}

/// Failure of [`IdempotencyStore::run_once`]
#[derive(Debug, thiserror::Error)]
pub enum RunOnceError<E> {
    /// The side effect failed; its reservation was released so a redelivery may retry
    #[error("Side effect failed: {0}")]
    Operation(E),

    /// The store could not reserve or commit. When raised after the side
    /// effect ran, the effect happened but its completion was not recorded.
    #[error(transparent)]
    Idempotency(IdempotencyError),
}

/// Durable dedup ledger with a bounded in-memory fallback
pub struct IdempotencyStore {
    ledger: Arc<dyn IdempotencyLedger>,
    fallback: FallbackLedger,
    config: IdempotencyConfig,
    degraded: AtomicBool,
    durable_failures: AtomicU64,
    fallback_operations: AtomicU64,
    promoted_records: AtomicU64,
    last_durable_error: Mutex<Option<String>>,
}

impl fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyStore")
            .field("backend", &self.ledger.backend_name())
            .field("degraded", &self.is_degraded())
            .field("fallback_entries", &self.fallback.len())
            .finish()
    }
}

impl IdempotencyStore {
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, config: IdempotencyConfig) -> Self {
        Self::with_clock(ledger, config, system_clock())
    }

    /// Store whose fallback tier reads time from `clock`
    pub fn with_clock(
        ledger: Arc<dyn IdempotencyLedger>,
        config: IdempotencyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(
            backend = ledger.backend_name(),
            fallback_enabled = config.fallback_enabled,
            fallback_max_entries = config.fallback_max_entries,
            fallback_ttl_seconds = config.fallback_ttl_seconds,
            reservation_timeout_seconds = config.reservation_timeout_seconds,
            "Initializing idempotency store"
        );

        Self {
            fallback: FallbackLedger::with_clock(
                config.fallback_max_entries,
                config.fallback_ttl(),
                clock,
            ),
            ledger,
            config,
            degraded: AtomicBool::new(false),
            durable_failures: AtomicU64::new(0),
            fallback_operations: AtomicU64::new(0),
            promoted_records: AtomicU64::new(0),
            last_durable_error: Mutex::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn backend_name(&self) -> &'static str {
        self.ledger.backend_name()
    }

    /// Pure lookup: has `event_id` been processed, and with what result?
    pub async fn is_processed(&self, event_id: &str) -> IdempotencyResult<ProcessedState> {
        validate_event_id(event_id)?;

        match self.ledger.find(event_id).await {
            Ok(record) => {
                let state = record.map(|r| r.state()).unwrap_or_default();
                // Read the fallback before promotion moves its markers to the ledger
                let state = if state.processed {
                    state
                } else {
                    self.fallback
                        .find(event_id)
                        .filter(|r| r.processed)
                        .map(|r| r.state())
                        .unwrap_or(state)
                };
                self.on_durable_success().await;
                Ok(state)
            }
            Err(err) => {
                self.on_durable_failure("is_processed", event_id, &err)?;
                Ok(self
                    .fallback
                    .find(event_id)
                    .map(|r| r.state())
                    .unwrap_or_default())
            }
        }
    }

    /// Durably record that `event_id` was processed with `result`
    pub async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<()> {
        validate_event_id(event_id)?;

        match self
            .ledger
            .mark_processed(event_id, event_type, result.clone())
            .await
        {
            Ok(_) => {
                self.fallback.remove(event_id);
                self.on_durable_success().await;
                log_idempotency_operation(
                    "mark_processed",
                    event_id,
                    Some(event_type),
                    "processed",
                    self.ledger.backend_name(),
                );
                Ok(())
            }
            Err(err) => {
                self.on_durable_failure("mark_processed", event_id, &err)?;
                self.fallback.mark_processed(event_id, event_type, result);
                log_idempotency_operation(
                    "mark_processed",
                    event_id,
                    Some(event_type),
                    "processed",
                    "fallback",
                );
                Ok(())
            }
        }
    }

    /// Reserve `event_id` before running its side effect
    pub async fn check_and_reserve(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> IdempotencyResult<Reservation> {
        validate_event_id(event_id)?;

        if let Some(record) = self.fallback.find(event_id).filter(|r| r.processed) {
            log_idempotency_operation(
                "check_and_reserve",
                event_id,
                Some(event_type),
                "already_processed",
                "fallback",
            );
            return Ok(Reservation::AlreadyProcessed {
                result: record.result,
            });
        }

        // A handler that reserved during an outage still holds the event after recovery
        let stale_after = self.config.reservation_timeout();
        if self.fallback.holds_reservation(event_id, stale_after) {
            log_idempotency_operation(
                "check_and_reserve",
                event_id,
                Some(event_type),
                Reservation::InProgress.as_str(),
                "fallback",
            );
            return Ok(Reservation::InProgress);
        }

        let (reservation, backend) = match self
            .ledger
            .reserve(event_id, event_type, stale_after)
            .await
        {
            Ok(outcome) => {
                self.on_durable_success().await;
                (Reservation::from(outcome), self.ledger.backend_name())
            }
            Err(err) => {
                self.on_durable_failure("check_and_reserve", event_id, &err)?;
                let outcome = self.fallback.reserve(event_id, event_type, stale_after);
                (Reservation::from(outcome), "fallback")
            }
        };

        log_idempotency_operation(
            "check_and_reserve",
            event_id,
            Some(event_type),
            reservation.as_str(),
            backend,
        );
        Ok(reservation)
    }

    /// Record the side effect's result; alias of [`mark_processed`](Self::mark_processed)
    pub async fn commit(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<()> {
        self.mark_processed(event_id, event_type, result).await
    }

    /// Drop an unprocessed reservation so a redelivery may retry the side effect
    pub async fn release(&self, event_id: &str) -> IdempotencyResult<bool> {
        validate_event_id(event_id)?;

        let released_local = self.fallback.release(event_id);
        let released_durable = match self.ledger.release(event_id).await {
            Ok(released) => {
                self.on_durable_success().await;
                released
            }
            Err(err) => {
                self.on_durable_failure("release", event_id, &err)?;
                false
            }
        };

        log_idempotency_operation(
            "release",
            event_id,
            None,
            if released_local || released_durable {
                "released"
            } else {
                "not_reserved"
            },
            self.ledger.backend_name(),
        );
        Ok(released_local || released_durable)
    }

    /// Reserve, run `side_effect`, and commit its JSON result.
    ///
    /// On a side-effect error the reservation is released and the error returned.
    pub async fn run_once<F, Fut, T, E>(
        &self,
        event_id: &str,
        event_type: &str,
        side_effect: F,
    ) -> Result<RunOnce<T>, RunOnceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: fmt::Display,
    {
        match self
            .check_and_reserve(event_id, event_type)
            .await
            .map_err(RunOnceError::Idempotency)?
        {
            Reservation::AlreadyProcessed { result } => return Ok(RunOnce::Duplicate { result }),
            Reservation::InProgress => return Ok(RunOnce::InProgress),
            Reservation::Acquired => {}
        }

        match side_effect().await {
            Ok(value) => {
                let result = match serde_json::to_value(&value) {
                    Ok(result) => Some(result),
                    Err(err) => {
                        warn!(
                            event_id = event_id,
                            error = %err,
                            "Side effect result is not serializable, committing without result"
                        );
                        None
                    }
                };
                self.commit(event_id, event_type, result)
                    .await
                    .map_err(RunOnceError::Idempotency)?;
                Ok(RunOnce::Executed(value))
            }
            Err(err) => {
                warn!(
                    event_id = event_id,
                    event_type = event_type,
                    error = %err,
                    "Side effect failed, releasing reservation"
                );
                if let Err(release_err) = self.release(event_id).await {
                    log_error(
                        "idempotency_store",
                        "release_after_failure",
                        &release_err.to_string(),
                        Some(event_id),
                    );
                }
                Err(RunOnceError::Operation(err))
            }
        }
    }

    /// Probe the durable ledger without touching degraded-mode bookkeeping
    pub async fn health_check(&self) -> bool {
        match self.ledger.health_check().await {
            Ok(healthy) => healthy,
            Err(err) => {
                warn!(
                    backend = self.ledger.backend_name(),
                    error = %err,
                    "Idempotency ledger health check failed"
                );
                false
            }
        }
    }

    pub fn status(&self) -> IdempotencyStatus {
        IdempotencyStatus {
            mode: if self.is_degraded() {
                StoreMode::Degraded
            } else {
                StoreMode::Normal
            },
            backend: self.ledger.backend_name().to_string(),
            fallback_enabled: self.config.fallback_enabled,
            fallback_entries: self.fallback.len(),
            fallback_max_entries: self.fallback.max_entries(),
            fallback_ttl: self.fallback.ttl(),
            durable_failures: self.durable_failures.load(Ordering::Relaxed),
            fallback_operations: self.fallback_operations.load(Ordering::Relaxed),
            promoted_records: self.promoted_records.load(Ordering::Relaxed),
            last_durable_error: self.last_durable_error.lock().clone(),
        }
    }

    /// Try a last promotion of fallback markers, then drop the fallback map
    pub async fn shutdown(&self) {
        if self.is_degraded() {
            self.promote_fallback().await;
        }

        let status = self.status();
        let dropped = self.fallback.clear();
        if dropped > 0 {
            warn!(
                dropped_entries = dropped,
                mode = ?status.mode,
                "Idempotency store shutting down with unpromoted fallback entries"
            );
        }
        info!(
            backend = %status.backend,
            durable_failures = status.durable_failures,
            fallback_operations = status.fallback_operations,
            promoted_records = status.promoted_records,
            "Idempotency store shut down"
        );
    }

    /// Record a ledger failure; errors when the fallback may not be used
    fn on_durable_failure(
        &self,
        operation: &str,
        event_id: &str,
        err: &IdempotencyError,
    ) -> IdempotencyResult<()> {
        self.durable_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_durable_error.lock() = Some(err.to_string());
        log_degraded_operation(
            operation,
            event_id,
            &err.to_string(),
            self.config.fallback_enabled,
        );

        if !self.config.fallback_enabled {
            error!(
                operation = operation,
                event_id = event_id,
                "Durable idempotency ledger failed and fallback is disabled, failing closed"
            );
            return Err(IdempotencyError::Unavailable {
                event_id: event_id.to_string(),
                reason: err.to_string(),
            });
        }

        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                backend = self.ledger.backend_name(),
                error = %err,
                "Idempotency store entering degraded mode: dedup is best-effort until the ledger recovers"
            );
        }
        self.fallback_operations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn on_durable_success(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!(
                backend = self.ledger.backend_name(),
                "Durable idempotency ledger recovered, leaving degraded mode"
            );
            self.promote_fallback().await;
        }
    }

    /// Copy processed fallback markers into the ledger
    async fn promote_fallback(&self) {
        for record in self.fallback.processed_records() {
            match self
                .ledger
                .mark_processed(&record.event_id, &record.event_type, record.result.clone())
                .await
            {
                Ok(_) => {
                    self.fallback.remove(&record.event_id);
                    self.promoted_records.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(
                        event_id = %record.event_id,
                        error = %err,
                        "Promotion of fallback marker failed, staying degraded"
                    );
                    self.degraded.store(true, Ordering::Release);
                    *self.last_durable_error.lock() = Some(err.to_string());
                    return;
                }
            }
        }
    }
}

fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
    if event_id.trim().is_empty() {
        return Err(IdempotencyError::InvalidEventId(
            "event id must not be empty".to_string(),
        ));
    }
    Ok(())
}
