//! # Database Helpers
//!
//! Connection helpers, embedded migrations and SQLSTATE constants shared by
//! the Postgres-backed idempotency ledger and cache tier.

pub mod error_codes;
pub mod migrator;

pub use error_codes::PgErrorCode;
pub use migrator::{run_migrations, MIGRATOR};

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// Open a connection pool sized for the resilience layer's own tables
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .test_before_acquire(true)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the pool can reach the database
pub async fn check_connection(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 as health").fetch_one(pool).await?;

    let health: i32 = row.get("health");
    Ok(health == 1)
}
