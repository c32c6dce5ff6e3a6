//! Idempotency error types

use thiserror::Error;

/// Errors raised by idempotency ledgers and the store
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Event identifiers must be non-empty
    #[error("Invalid event id: {0}")]
    InvalidEventId(String),

    /// Ledger-level failure that is not a database driver error
    #[error("Idempotency ledger error: {0}")]
    LedgerError(String),

    /// Durable tier database failure
    #[error("Idempotency database error: {0}")]
    DatabaseError(String),

    /// Result payload could not be serialized
    #[error("Idempotency serialization error: {0}")]
    SerializationError(String),

    /// The durable tier failed and no fallback may be consulted.
    ///
    /// Callers must not proceed with the side effect: processing state is unknown.
    #[error("Cannot guarantee idempotency for event '{event_id}': {reason}")]
    Unavailable { event_id: String, reason: String },
}

impl IdempotencyError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IdempotencyError::Unavailable { .. })
    }
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(err: sqlx::Error) -> Self {
        IdempotencyError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for IdempotencyError {
    fn from(err: serde_json::Error) -> Self {
        IdempotencyError::SerializationError(err.to_string())
    }
}

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;
