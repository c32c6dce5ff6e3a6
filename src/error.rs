//! Error types for the resilience layer.
//!
//! Each component owns a focused error enum; [`ResilienceError`] aggregates them
//! for callers that drive several components through one code path (for example
//! [`crate::context::ResilienceContext`] initialization).

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::idempotency::IdempotencyError;
use crate::resilience::CircuitBreakerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
    #[error("Idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for ResilienceError {
    fn from(err: sqlx::Error) -> Self {
        ResilienceError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::SerializationError(err.to_string())
    }
}

impl<E: std::fmt::Display> From<CircuitBreakerError<E>> for ResilienceError {
    fn from(err: CircuitBreakerError<E>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { component } => {
                ResilienceError::CircuitBreakerOpen(component)
            }
            CircuitBreakerError::OperationFailed(inner) => {
                ResilienceError::OperationFailed(inner.to_string())
            }
        }
    }
}

impl ResilienceError {
    /// Whether the business layer should answer "service temporarily unavailable"
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitBreakerOpen(_)
                | ResilienceError::Idempotency(IdempotencyError::Unavailable { .. })
        )
    }
}

pub type ResilienceResult<T> = Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_maps_to_unavailable() {
        let err: ResilienceError = CircuitBreakerError::<String>::CircuitOpen {
            component: "payments".to_string(),
        }
        .into();

        assert!(err.is_unavailable());
        assert_eq!(err.to_string(), "Circuit breaker open: payments");
    }

    #[test]
    fn test_operation_failure_keeps_message() {
        let err: ResilienceError =
            CircuitBreakerError::OperationFailed("upstream returned 503".to_string()).into();

        assert!(!err.is_unavailable());
        assert_eq!(err.to_string(), "Operation failed: upstream returned 503");
    }

    #[test]
    fn test_idempotency_unavailable_is_unavailable() {
        let err: ResilienceError = IdempotencyError::Unavailable {
            event_id: "evt-1".to_string(),
            reason: "ledger down".to_string(),
        }
        .into();
        assert!(err.is_unavailable());
    }
}
