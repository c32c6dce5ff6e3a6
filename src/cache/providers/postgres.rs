//! PostgreSQL cache provider
//!
//! Stores entries in `resilience_cache_entries` with an absolute `expires_at`.
//! Expired rows read as misses and are removed by [`PgCacheService::purge_expired`].

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::{CacheService, CachedValue};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS resilience_cache_entries (
    cache_key   TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_resilience_cache_entries_expires_at
    ON resilience_cache_entries (expires_at)
"#;

/// External cache tier backed by a Postgres table
#[derive(Debug, Clone)]
pub struct PgCacheService {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    value: String,
    expires_at: DateTime<Utc>,
}

impl PgCacheService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the cache table if it does not exist
    pub async fn ensure_schema(&self) -> CacheResult<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&self.pool).await?;
        info!("Cache schema ensured (resilience_cache_entries)");
        Ok(())
    }

    /// Delete expired rows, returning how many were removed
    pub async fn purge_expired(&self) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM resilience_cache_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged = purged, "Purged expired cache entries");
        }
        Ok(purged)
    }
}

impl CacheService for PgCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<CachedValue>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT value, expires_at
            FROM resilience_cache_entries
            WHERE cache_key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let ttl_remaining = (row.expires_at - Utc::now()).to_std().ok();
            CachedValue::new(row.value, ttl_remaining)
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::BackendError(format!("TTL out of range: {e}")))?;
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            r#"
            INSERT INTO resilience_cache_entries (cache_key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (cache_key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM resilience_cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        crate::database::check_connection(&self.pool)
            .await
            .map_err(CacheError::from)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
