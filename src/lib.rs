#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resilience Core
//!
//! Resilience and idempotency layer between application logic and unreliable
//! external dependencies (payment processors, mail carrier APIs, email
//! providers, geocoding services).
//!
//! ## Overview
//!
//! The layer does three things:
//!
//! - stops hammering a failing dependency and recovers automatically ([`resilience::CircuitBreaker`]);
//! - retries transient failures with exponential backoff and jitter ([`resilience::RetryExecutor`]);
//! - makes repeated deliveries of one inbound event run its side effects at most once
//!   ([`idempotency::IdempotencyStore`]).
//!
//! A two-tier TTL cache ([`cache::TwoTierCache`]) keeps reads available when the
//! external cache tier is down.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breakers, registry, retry executor
//! - [`idempotency`] - Durable dedup ledger with in-memory fallback
//! - [`cache`] - Two-tier TTL cache
//! - [`config`] - Layered TOML/environment configuration
//! - [`context`] - Owned bundle of all components with health and shutdown
//! - [`error`] - Aggregated error type
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_core::config::ResilienceConfig;
//! use resilience_core::context::ResilienceContext;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! resilience_core::logging::init_structured_logging();
//! let context = ResilienceContext::in_memory(ResilienceConfig::default())?;
//!
//! let breaker = context.circuit_breakers().get_circuit_breaker("geocoder");
//! let retry = context.retry_executor::<String>();
//! let coordinates = retry
//!     .run_guarded(&breaker, || async { Ok::<_, String>((40.7, -74.0)) })
//!     .await?;
//! # let _ = coordinates;
//!
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod idempotency;
pub mod logging;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, ResilienceConfig};
pub use context::{HealthReport, ResilienceContext};
pub use error::{ResilienceError, ResilienceResult};
pub use idempotency::{IdempotencyStore, Reservation};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerManager, CircuitState, RetryExecutor,
    RetryPolicy,
};
