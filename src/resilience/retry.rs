//! # Retry Executor
//!
//! Bounded retries with exponential backoff and symmetric jitter.
//!
//! ```text
//! delay  = min(base_delay * exponential_base ^ attempt_index, max_delay)
//! actual = delay ± uniform(0, delay * jitter_fraction)
//! ```
//!
//! `attempt_index` is zero-based: the wait after the first failed attempt uses
//! index 0. When the budget is spent the error of the final attempt is returned
//! unchanged, and errors the retry predicate rejects are returned on first
//! occurrence without consuming budget.
//!
//! The async variants suspend only the calling task. [`RetryExecutor::run_blocking`]
//! parks the calling thread and is meant for synchronous callers.

use crate::resilience::{CircuitBreaker, CircuitBreakerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff parameters for a retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt, before jitter
    pub base_delay: Duration,

    /// Upper bound for the un-jittered delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub exponential_base: f64,

    /// Jitter amplitude as a fraction of the delay (0.0 - 1.0)
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy for webhook-driven side effects: quick retries, short ceiling
    pub fn for_webhook_side_effects() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter_fraction: 0.2,
        }
    }

    /// Validate policy parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.max_attempts > 20 {
            return Err("max_attempts should not exceed 20".to_string());
        }

        if self.base_delay > self.max_delay {
            return Err("base_delay must not exceed max_delay".to_string());
        }

        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err("exponential_base must be a finite value >= 1.0".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err("jitter_fraction must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Un-jittered delay after the attempt at `attempt_index` failed
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = attempt_index.min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);

        if secs.is_finite() && secs < max_secs {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Delay after the attempt at `attempt_index` failed, with random jitter applied
    pub fn jittered_delay(&self, attempt_index: u32) -> Duration {
        apply_jitter(
            self.backoff_delay(attempt_index),
            self.jitter_fraction,
            fastrand::f64(),
        )
    }
}

/// Shift `delay` by up to `delay * fraction` in either direction.
///
/// `sample` is a uniform draw from `[0, 1)`; 0.5 leaves the delay unchanged.
pub(crate) fn apply_jitter(delay: Duration, fraction: f64, sample: f64) -> Duration {
    if fraction <= 0.0 || delay.is_zero() {
        return delay;
    }

    let secs = delay.as_secs_f64();
    let offset = (sample * 2.0 - 1.0) * fraction * secs;
    Duration::from_secs_f64((secs + offset).max(0.0))
}

/// Outcome of a cancellable retry loop
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Cancellation was requested while an attempt or backoff was in progress
    #[error("Retry cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// The final attempt failed; the operation's error is carried unchanged
    #[error("{0}")]
    Failed(E),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(err) => Some(err),
            RetryError::Cancelled { .. } => None,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(u32, &E, Duration) + Send + Sync>;

/// Runs an operation under a [`RetryPolicy`]
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    is_retryable: RetryPredicate<E>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            is_retryable: Arc::clone(&self.is_retryable),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> RetryExecutor<E>
where
    E: fmt::Display,
{
    /// Executor that retries every error
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            is_retryable: Arc::new(|_| true),
            on_retry: None,
        }
    }

    /// Retry only errors for which `predicate` returns true
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Invoke `hook(attempt_index, error, delay)` before each backoff wait
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(u32, &E, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.is_retryable)(error)
    }

    /// Decide whether the failed attempt at `attempt_index` is retried, and after how long
    fn next_delay(&self, attempt_index: u32, error: &E) -> Option<Duration> {
        if !self.is_retryable(error) {
            debug!(
                attempt = attempt_index + 1,
                error = %error,
                "Error is not retryable"
            );
            return None;
        }

        if attempt_index + 1 >= self.policy.max_attempts.max(1) {
            warn!(
                attempts = attempt_index + 1,
                error = %error,
                "Retry attempts exhausted"
            );
            return None;
        }

        let delay = self.policy.jittered_delay(attempt_index);
        if let Some(hook) = &self.on_retry {
            hook(attempt_index, error, delay);
        }

        debug!(
            attempt = attempt_index + 1,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after backoff"
        );
        Some(delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the budget is spent
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt_index = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => match self.next_delay(attempt_index, &error) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt_index += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Blocking variant of [`run`](Self::run)
    pub fn run_blocking<F, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt_index = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => match self.next_delay(attempt_index, &error) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt_index += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Variant of [`run`](Self::run) that stops as soon as `cancel` fires.
    ///
    /// Cancellation drops any in-flight attempt and surfaces as
    /// [`RetryError::Cancelled`], never as a retryable failure.
    pub async fn run_cancellable<F, Fut, T>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt_index = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempts = attempt_index, "Retry cancelled during attempt");
                    return Err(RetryError::Cancelled { attempts: attempt_index });
                }
                outcome = operation() => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => match self.next_delay(attempt_index, &error) {
                    Some(delay) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                debug!(attempts = attempt_index + 1, "Retry cancelled during backoff");
                                return Err(RetryError::Cancelled { attempts: attempt_index + 1 });
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        attempt_index += 1;
                    }
                    None => return Err(RetryError::Failed(error)),
                },
            }
        }
    }

    /// Retry wrapped around a circuit breaker.
    ///
    /// Every attempt passes through `breaker`, which counts the errors this
    /// executor considers retryable. A rejection from an open circuit ends the
    /// loop immediately.
    pub async fn run_guarded<F, Fut, T>(
        &self,
        breaker: &CircuitBreaker,
        mut operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt_index = 0;
        loop {
            let outcome = breaker
                .call_filtered(|| operation(), |error: &E| self.is_retryable(error))
                .await;

            match outcome {
                Ok(value) => return Ok(value),
                Err(CircuitBreakerError::OperationFailed(error)) => {
                    match self.next_delay(attempt_index, &error) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt_index += 1;
                        }
                        None => return Err(CircuitBreakerError::OperationFailed(error)),
                    }
                }
                Err(open) => return Err(open),
            }
        }
    }
}
