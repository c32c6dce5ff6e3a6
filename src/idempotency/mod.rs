//! # Idempotency Module
//!
//! Guarantees that an inbound event delivered more than once produces its side
//! effects at most once.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::IdempotencyConfig;
//! use resilience_core::idempotency::{IdempotencyStore, InMemoryLedger, Reservation};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = IdempotencyStore::new(Arc::new(InMemoryLedger::new()), IdempotencyConfig::default());
//!
//! match store.check_and_reserve("evt_123", "payment.succeeded").await? {
//!     Reservation::Acquired => {
//!         // run the side effect, then:
//!         store.commit("evt_123", "payment.succeeded", None).await?;
//!     }
//!     Reservation::AlreadyProcessed { .. } | Reservation::InProgress => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod fallback;
pub mod ledger;
pub mod postgres;
pub mod record;
pub mod store;

pub use errors::{IdempotencyError, IdempotencyResult};
pub use fallback::FallbackLedger;
pub use ledger::{IdempotencyLedger, InMemoryLedger};
pub use postgres::PgIdempotencyLedger;
pub use record::{IdempotencyRecord, ProcessedState, Reservation, ReserveOutcome};
pub use store::{IdempotencyStatus, IdempotencyStore, RunOnce, RunOnceError, StoreMode};
