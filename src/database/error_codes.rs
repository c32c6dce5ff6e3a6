//! PostgreSQL Error Codes
//!
//! SQLSTATE constants used by the Postgres-backed tiers.
//!
//! Full list: <https://www.postgresql.org/docs/current/errcodes-appendix.html>

/// PostgreSQL SQLSTATE error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PgErrorCode;

impl PgErrorCode {
    /// Unique violation (duplicate key) - Code 23505
    ///
    /// Raised when two writers insert a reservation for the same event id;
    /// the loser re-reads the winner's row.
    pub const UNIQUE_VIOLATION: &'static str = "23505";

    /// Serialization failure - Code 40001
    pub const SERIALIZATION_FAILURE: &'static str = "40001";

    /// Deadlock detected - Code 40P01
    pub const DEADLOCK_DETECTED: &'static str = "40P01";

    /// Check if the error code is a unique constraint violation
    #[inline]
    pub fn is_unique_violation(code: &str) -> bool {
        code == Self::UNIQUE_VIOLATION
    }

    /// Check if the error is retryable (serialization failure or deadlock)
    #[inline]
    pub fn is_retryable_transaction_error(code: &str) -> bool {
        code == Self::SERIALIZATION_FAILURE || code == Self::DEADLOCK_DETECTED
    }

    /// Classify a driver error as transient for retry predicates
    pub fn is_transient(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .as_deref()
                .is_some_and(Self::is_retryable_transaction_error),
            _ => false,
        }
    }
}
