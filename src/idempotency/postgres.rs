//! PostgreSQL idempotency ledger
//!
//! Records live in `resilience_idempotency_records`, keyed by `event_id`.
//! Reservations are plain inserts: a unique violation means another writer got
//! there first, and the existing row is re-read rather than surfaced as an
//! error. Processed upserts keep the first stored result.

use super::errors::{IdempotencyError, IdempotencyResult};
use super::ledger::IdempotencyLedger;
use super::record::{IdempotencyRecord, ReserveOutcome};
use crate::database::PgErrorCode;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS resilience_idempotency_records (
    event_id    TEXT PRIMARY KEY,
    event_type  TEXT NOT NULL,
    processed   BOOLEAN NOT NULL DEFAULT FALSE,
    result      JSONB,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_resilience_idempotency_records_pending
    ON resilience_idempotency_records (updated_at)
    WHERE processed = FALSE
"#;

/// Bound on insert/re-read rounds when reservations race with releases
const MAX_RESERVE_ROUNDS: usize = 3;

/// Durable ledger backed by Postgres
#[derive(Debug, Clone)]
pub struct PgIdempotencyLedger {
    pool: PgPool,
}

impl PgIdempotencyLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger table if it does not exist
    pub async fn ensure_schema(&self) -> IdempotencyResult<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&self.pool).await?;
        info!("Idempotency schema ensured (resilience_idempotency_records)");
        Ok(())
    }

    async fn insert_reservation(&self, event_id: &str, event_type: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO resilience_idempotency_records
                (event_id, event_type, processed, result, created_at, updated_at)
            VALUES ($1, $2, FALSE, NULL, NOW(), NOW())
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    /// Refresh a stale unprocessed reservation; true when this caller took it over
    async fn take_over_stale(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> IdempotencyResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resilience_idempotency_records
            SET event_type = $2, updated_at = NOW()
            WHERE event_id = $1
              AND processed = FALSE
              AND updated_at <= NOW() - make_interval(secs => $3)
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyLedger for PgIdempotencyLedger {
    async fn find(&self, event_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT event_id, event_type, processed, result, created_at, updated_at
            FROM resilience_idempotency_records
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn reserve(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> IdempotencyResult<ReserveOutcome> {
        for _ in 0..MAX_RESERVE_ROUNDS {
            match self.insert_reservation(event_id, event_type).await {
                Ok(()) => return Ok(ReserveOutcome::Reserved),
                Err(sqlx::Error::Database(ref db_err))
                    if db_err
                        .code()
                        .as_deref()
                        .is_some_and(PgErrorCode::is_unique_violation) =>
                {
                    debug!(event_id = event_id, "Reservation conflict, re-reading existing record");
                }
                Err(e) => return Err(e.into()),
            }

            if self.take_over_stale(event_id, event_type, stale_after).await? {
                info!(event_id = event_id, "Took over stale idempotency reservation");
                return Ok(ReserveOutcome::Reserved);
            }

            // A concurrent release can delete the row between insert and read
            if let Some(existing) = self.find(event_id).await? {
                return Ok(ReserveOutcome::Existing(existing));
            }
        }

        Err(IdempotencyError::LedgerError(format!(
            "reservation for '{event_id}' kept racing with concurrent releases"
        )))
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<IdempotencyRecord> {
        let upserted = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            INSERT INTO resilience_idempotency_records
                (event_id, event_type, processed, result, created_at, updated_at)
            VALUES ($1, $2, TRUE, $3, NOW(), NOW())
            ON CONFLICT (event_id) DO UPDATE
                SET processed = TRUE,
                    result = EXCLUDED.result,
                    event_type = EXCLUDED.event_type,
                    updated_at = NOW()
                WHERE resilience_idempotency_records.processed = FALSE
            RETURNING event_id, event_type, processed, result, created_at, updated_at
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(result)
        .fetch_optional(&self.pool)
        .await?;

        match upserted {
            Some(record) => Ok(record),
            // Already processed by an earlier writer; its result stands
            None => self.find(event_id).await?.ok_or_else(|| {
                IdempotencyError::LedgerError(format!(
                    "processed record for '{event_id}' disappeared during upsert"
                ))
            }),
        }
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<bool> {
        let result = sqlx::query(
            "DELETE FROM resilience_idempotency_records WHERE event_id = $1 AND processed = FALSE",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> IdempotencyResult<bool> {
        crate::database::check_connection(&self.pool)
            .await
            .map_err(IdempotencyError::from)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
