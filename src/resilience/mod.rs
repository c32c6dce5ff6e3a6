//! # Resilience Module
//!
//! Fault tolerance for calls to unreliable external dependencies: per-dependency
//! circuit breakers, a registry that owns them, and a retry executor with
//! exponential backoff and jitter.
//!
//! ## Composition
//!
//! ```text
//! RetryExecutor::run_guarded(breaker, operation)
//!     → attempt: CircuitBreaker::call_filtered(operation)
//!         → Open: reject without calling the dependency (never retried)
//!         → Err(retryable): counted by the breaker, retried after backoff
//!         → Err(other): returned immediately, breaker untouched
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryExecutor, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new(
//!     "payment_processor".to_string(),
//!     CircuitBreakerConfig::for_payment_processor(),
//! );
//! let retry = RetryExecutor::new(RetryPolicy::default());
//!
//! let receipt = retry
//!     .run_guarded(&breaker, || async { Ok::<_, String>("ch_123") })
//!     .await?;
//! # let _ = receipt;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod retry;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerStatus, SystemCircuitBreakerStatus};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
