//! Durable idempotency ledger abstraction
//!
//! A ledger is the primary tier of the idempotency store. Every implementation
//! must make `reserve` and `mark_processed` atomic per `event_id`: of any
//! number of concurrent callers, exactly one is told it holds the reservation.

use super::errors::IdempotencyResult;
use super::record::{IdempotencyRecord, ReserveOutcome};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait IdempotencyLedger: Send + Sync + fmt::Debug {
    /// Look up the record for `event_id`
    async fn find(&self, event_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>>;

    /// Atomically create an unprocessed reservation.
    ///
    /// An existing unprocessed record untouched for `stale_after` is taken over
    /// and reported as [`ReserveOutcome::Reserved`].
    async fn reserve(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> IdempotencyResult<ReserveOutcome>;

    /// Upsert a processed record. The first processed result is kept.
    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<IdempotencyRecord>;

    /// Delete an unprocessed reservation; processed records are never removed
    async fn release(&self, event_id: &str) -> IdempotencyResult<bool>;

    async fn health_check(&self) -> IdempotencyResult<bool> {
        Ok(true)
    }

    fn backend_name(&self) -> &'static str;
}

/// Process-local ledger for tests and single-instance deployments
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<DashMap<String, IdempotencyRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn find(&self, event_id: &str) -> IdempotencyResult<Option<IdempotencyRecord>> {
        Ok(self.records.get(event_id).map(|record| record.clone()))
    }

    async fn reserve(
        &self,
        event_id: &str,
        event_type: &str,
        stale_after: Duration,
    ) -> IdempotencyResult<ReserveOutcome> {
        match self.records.entry(event_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(IdempotencyRecord::reserved(event_id, event_type));
                Ok(ReserveOutcome::Reserved)
            }
            Entry::Occupied(mut occupied) => {
                let now = Utc::now();
                if occupied.get().is_stale_reservation(now, stale_after) {
                    let record = occupied.get_mut();
                    record.event_type = event_type.to_string();
                    record.updated_at = now;
                    Ok(ReserveOutcome::Reserved)
                } else {
                    Ok(ReserveOutcome::Existing(occupied.get().clone()))
                }
            }
        }
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyResult<IdempotencyRecord> {
        let mut entry = self
            .records
            .entry(event_id.to_string())
            .or_insert_with(|| IdempotencyRecord::reserved(event_id, event_type));

        if !entry.processed {
            entry.processed = true;
            entry.result = result;
            entry.event_type = event_type.to_string();
            entry.updated_at = Utc::now();
        }

        Ok(entry.clone())
    }

    async fn release(&self, event_id: &str) -> IdempotencyResult<bool> {
        Ok(self
            .records
            .remove_if(event_id, |_, record| !record.processed)
            .is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_first_reservation_wins() {
        let ledger = InMemoryLedger::new();

        assert_eq!(
            ledger.reserve("evt_1", "charge", TIMEOUT).await.unwrap(),
            ReserveOutcome::Reserved
        );
        assert!(matches!(
            ledger.reserve("evt_1", "charge", TIMEOUT).await.unwrap(),
            ReserveOutcome::Existing(record) if !record.processed
        ));
    }

    #[tokio::test]
    async fn test_mark_processed_keeps_first_result() {
        let ledger = InMemoryLedger::new();

        ledger
            .mark_processed("evt_1", "charge", Some(json!("first")))
            .await
            .unwrap();
        let record = ledger
            .mark_processed("evt_1", "charge", Some(json!("second")))
            .await
            .unwrap();

        assert_eq!(record.result, Some(json!("first")));
    }

    #[tokio::test]
    async fn test_release_only_drops_unprocessed() {
        let ledger = InMemoryLedger::new();
        ledger.reserve("evt_1", "charge", TIMEOUT).await.unwrap();
        ledger.mark_processed("evt_2", "charge", None).await.unwrap();

        assert!(ledger.release("evt_1").await.unwrap());
        assert!(!ledger.release("evt_2").await.unwrap());
        assert!(ledger.find("evt_1").await.unwrap().is_none());
        assert!(ledger.find("evt_2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_reservation_is_taken_over() {
        let ledger = InMemoryLedger::new();
        ledger.reserve("evt_1", "charge", TIMEOUT).await.unwrap();

        assert_eq!(
            ledger.reserve("evt_1", "charge", Duration::ZERO).await.unwrap(),
            ReserveOutcome::Reserved
        );
    }
}
