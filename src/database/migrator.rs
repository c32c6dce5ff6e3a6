//! # Database Migration Support
//!
//! Embeds `migrations/` for deployments that manage schema with sqlx and for
//! database tests:
//!
//! ```rust,ignore
//! #[sqlx::test(migrator = "resilience_core::database::MIGRATOR")]
//! async fn test_something(pool: PgPool) -> sqlx::Result<()> { /* ... */ }
//! ```

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::PgPool;
use tracing::info;

/// Idempotency ledger and cache tier tables
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations to `pool`
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Resilience schema migrations applied"
    );
    Ok(())
}
