//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for calls to unreliable external dependencies.
//! This implementation follows the classic circuit breaker pattern with three states:
//! Closed (normal operation), Open (failing fast), and Half-Open (testing recovery).
//!
//! ## Concurrency
//!
//! All transition decisions for one breaker are made under a single
//! `parking_lot::Mutex`. The protected operation runs outside the lock, so a
//! slow dependency never serializes unrelated callers. The lock is never held
//! across an `.await`.
//!
//! ## Half-Open admission
//!
//! By default every caller that arrives while half-open is admitted as a trial
//! call. Setting `half_open_max_trials` limits the number of trial calls in
//! flight; callers beyond the limit are rejected as if the circuit were open.

use crate::clock::{system_clock, Clock};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - trial calls allowed to test dependency health
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation ran and failed; the dependency's error is carried unchanged
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    /// Borrow the dependency's error, if the operation ran
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            CircuitBreakerError::OperationFailed(err) => Some(err),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }

    /// Recover the dependency's error, if the operation ran
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(err) => Some(err),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}

/// Lock-free lifetime counters, updated outside the state lock.
#[derive(Debug, Default)]
struct AtomicCallMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_calls: AtomicU64,
    ignored_errors: AtomicU64,
    success_duration_nanos: AtomicU64,
}

impl AtomicCallMetrics {
    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.success_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_ignored(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.ignored_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejected(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// State guarded by the breaker lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_reason: Option<String>,
    half_open_in_flight: u32,
    /// Bumped on every transition so stale trial permits don't touch a newer window
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_failure_reason: None,
            half_open_in_flight: 0,
            generation: 0,
        }
    }
}

enum Admission {
    Rejected,
    /// `Some(generation)` when admitted as a half-open trial
    Allowed(Option<u64>),
}

/// Releases a half-open trial slot when the call completes or is dropped
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation {
            let mut inner = self.breaker.inner.lock();
            if inner.generation == generation {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
        }
    }
}

/// Circuit breaker guarding one named dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and status
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// When false the breaker only records metrics and never rejects
    enabled: bool,

    clock: Arc<dyn Clock>,

    inner: Mutex<BreakerState>,

    metrics: AtomicCallMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    /// Create a circuit breaker that reads time from `clock`
    pub fn with_clock(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            half_open_max_trials = ?config.half_open_max_trials,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            enabled: true,
            clock,
            inner: Mutex::new(BreakerState::new()),
            metrics: AtomicCallMetrics::default(),
        }
    }

    /// Create a breaker that records metrics but always admits calls
    pub fn pass_through(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        debug!(component = %name, "Circuit breaker created in pass-through mode");
        Self {
            name,
            config,
            enabled: false,
            clock,
            inner: Mutex::new(BreakerState::new()),
            metrics: AtomicCallMetrics::default(),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Execute an operation, counting every error as a dependency failure
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.call_filtered(operation, |_| true).await
    }

    /// Execute an operation, counting only errors for which `is_failure` returns true.
    ///
    /// Other errors propagate without touching breaker state, so caller bugs
    /// (validation errors, 4xx responses) never trip the circuit.
    pub async fn call_filtered<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.admit::<E>()?;

        let start_time = Instant::now();
        let result = operation().await;
        self.complete(&result, is_failure, start_time.elapsed());
        drop(permit);

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Execute an operation, serving `fallback` instead of rejecting while open
    pub async fn call_with_fallback<F, Fut, T, E, P, FB>(
        &self,
        operation: F,
        is_failure: P,
        fallback: FB,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: FnOnce(&E) -> bool,
        FB: FnOnce() -> T,
    {
        match self.call_filtered(operation, is_failure).await {
            Err(CircuitBreakerError::CircuitOpen { .. }) => {
                debug!(component = %self.name, "Circuit open, serving fallback");
                Ok(fallback())
            }
            other => other,
        }
    }

    /// Blocking variant of [`call_filtered`](Self::call_filtered) for synchronous callers
    pub fn call_blocking<F, T, E, P>(
        &self,
        operation: F,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.admit::<E>()?;

        let start_time = Instant::now();
        let result = operation();
        self.complete(&result, is_failure, start_time.elapsed());
        drop(permit);

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Check if a call would currently be admitted, without reserving a trial slot
    pub fn should_allow(&self) -> bool {
        if !self.enabled {
            return true;
        }

        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(&inner),
            CircuitState::HalfOpen => self
                .config
                .half_open_max_trials
                .map_or(true, |max| inner.half_open_in_flight < max),
        }
    }

    fn admit<E>(&self) -> Result<TrialPermit<'_>, CircuitBreakerError<E>> {
        match self.try_acquire() {
            Admission::Allowed(generation) => Ok(TrialPermit {
                breaker: self,
                generation,
            }),
            Admission::Rejected => {
                self.metrics.record_rejected();
                debug!(component = %self.name, "Call rejected, circuit open");
                Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                })
            }
        }
    }

    /// Decide admission; performs the Open -> HalfOpen transition when the cooldown elapsed
    fn try_acquire(&self) -> Admission {
        if !self.enabled {
            return Admission::Allowed(None);
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed(None),
            CircuitState::Open => {
                if self.cooldown_elapsed(&inner) {
                    self.transition_to_half_open(&mut inner);
                    self.admit_trial(&mut inner)
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => self.admit_trial(&mut inner),
        }
    }

    fn cooldown_elapsed(&self, inner: &BreakerState) -> bool {
        match inner.last_failure_at {
            Some(opened_at) => {
                self.clock.now().saturating_duration_since(opened_at) >= self.config.timeout
            }
            None => {
                // Open always records a failure time; allow the call rather than stay stuck
                warn!(component = %self.name, "Circuit open but no failure time recorded");
                true
            }
        }
    }

    fn admit_trial(&self, inner: &mut BreakerState) -> Admission {
        if let Some(max_trials) = self.config.half_open_max_trials {
            if inner.half_open_in_flight >= max_trials {
                return Admission::Rejected;
            }
        }
        inner.half_open_in_flight += 1;
        Admission::Allowed(Some(inner.generation))
    }

    fn complete<T, E, P>(&self, result: &Result<T, E>, is_failure: P, duration: Duration)
    where
        E: fmt::Display,
        P: FnOnce(&E) -> bool,
    {
        match result {
            Ok(_) => self.record_success(duration),
            Err(err) if is_failure(err) => self.record_failure(duration, err.to_string()),
            Err(err) => {
                self.metrics.record_ignored();
                debug!(
                    component = %self.name,
                    error = %err,
                    "Error excluded from circuit breaker accounting"
                );
            }
        }
    }

    /// Record a successful operation
    fn record_success(&self, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Closed => {
                // Reset failure count on success
                inner.failure_count = 0;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    fn record_failure(&self, duration: Duration, reason: String) {
        self.metrics.record_failure();

        error!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            error = %reason,
            "Operation failed"
        );

        if !self.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        inner.last_failure_reason = Some(reason);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately opens circuit
                inner.failure_count += 1;
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {
                // Already open, just record the failure
            }
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.generation += 1;

        info!(
            component = %self.name,
            total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
            "Circuit breaker closed (recovered)"
        );
    }

    /// Transition to open state (failing fast)
    fn transition_to_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.last_failure_at = Some(self.clock.now());
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.generation += 1;

        error!(
            component = %self.name,
            consecutive_failures = inner.failure_count,
            failure_threshold = self.config.failure_threshold,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to half-open state (testing recovery)
    fn transition_to_half_open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::HalfOpen;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.generation += 1;

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "Circuit breaker half-open (testing recovery)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut inner = self.inner.lock();
        self.transition_to_open(&mut inner);
    }

    /// Force circuit closed with zeroed counters (operator escape hatch).
    ///
    /// Lifetime totals reported by [`status`](Self::status) are kept.
    pub fn reset(&self) {
        warn!(component = %self.name, "Circuit breaker reset");
        let mut inner = self.inner.lock();
        inner.last_failure_at = None;
        inner.last_failure_reason = None;
        self.transition_to_closed(&mut inner);
    }

    /// Get a read-only status snapshot
    pub fn status(&self) -> CircuitBreakerStatus {
        let (state, failure_count, success_count, last_failure_at, last_failure_reason) = {
            let inner = self.inner.lock();
            (
                inner.state,
                inner.failure_count,
                inner.success_count,
                inner.last_failure_at,
                inner.last_failure_reason.clone(),
            )
        };

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        let total_successes = self.metrics.success_count.load(Ordering::Relaxed);
        let total_failures = self.metrics.failure_count.load(Ordering::Relaxed);
        let ignored_errors = self.metrics.ignored_errors.load(Ordering::Relaxed);
        let success_nanos = self.metrics.success_duration_nanos.load(Ordering::Relaxed);

        let completed = total_successes + total_failures + ignored_errors;
        let failure_rate = if completed > 0 {
            total_failures as f64 / completed as f64
        } else {
            0.0
        };
        let average_duration = if total_successes > 0 {
            Duration::from_nanos(success_nanos / total_successes)
        } else {
            Duration::ZERO
        };

        CircuitBreakerStatus {
            name: self.name.clone(),
            state,
            enabled: self.enabled,
            failure_count,
            success_count,
            total_calls,
            total_failures,
            total_successes,
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            ignored_errors,
            last_failure_reason,
            since_last_failure: last_failure_at
                .map(|at| self.clock.now().saturating_duration_since(at)),
            failure_rate,
            average_duration,
            config: self.config.clone(),
        }
    }

    /// Check if circuit is healthy; same rule as [`CircuitBreakerStatus::is_healthy`]
    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }
}
