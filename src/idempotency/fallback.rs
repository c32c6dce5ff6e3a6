//! In-process fallback tier for the idempotency store
//!
//! Consulted only while the durable ledger is failing. Entries older than the
//! TTL read as misses. When the map is full, every entry older than the TTL is
//! swept before a new one is admitted; if that frees nothing, the oldest
//! entries are evicted.

use super::record::{IdempotencyRecord, ReserveOutcome};
use crate::clock::{system_clock, Clock};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct FallbackEntry {
    record: IdempotencyRecord,
    /// Last reservation or processed marker; TTL and staleness are measured from here
    written_at: Instant,
}

/// Bounded, TTL-limited idempotency map guarded by a single mutex
#[derive(Debug)]
pub struct FallbackLedger {
    entries: Mutex<HashMap<String, FallbackEntry>>,
    max_entries: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FallbackLedger {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self::with_clock(max_entries, ttl, system_clock())
    }

    pub fn with_clock(max_entries: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Live record for `event_id`; expired entries are dropped and read as misses
    pub fn find(&self, event_id: &str) -> Option<IdempotencyRecord> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        match entries.get(event_id) {
            Some(entry) if !self.is_expired(entry, now) => Some(entry.record.clone()),
            Some(_) => {
                entries.remove(event_id);
                None
            }
            None => None,
        }
    }

    /// Whether an unprocessed reservation for `event_id` is live and not yet stale
    pub fn holds_reservation(&self, event_id: &str, stale_after: Duration) -> bool {
        let now = self.clock.now();
        let entries = self.entries.lock();

        entries.get(event_id).is_some_and(|entry| {
            !entry.record.processed
                && !self.is_expired(entry, now)
                && now.saturating_duration_since(entry.written_at) < stale_after
        })
    }

    pub fn reserve(&self, event_id: &str, event_type: &str, stale_after: Duration) -> ReserveOutcome {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(event_id) {
            if !self.is_expired(entry, now) {
                let stale = !entry.record.processed
                    && now.saturating_duration_since(entry.written_at) >= stale_after;
                if !stale {
                    return ReserveOutcome::Existing(entry.record.clone());
                }
                entry.record.event_type = event_type.to_string();
                entry.written_at = now;
                return ReserveOutcome::Reserved;
            }
        }

        self.admit(
            &mut entries,
            now,
            IdempotencyRecord::reserved(event_id, event_type),
        );
        ReserveOutcome::Reserved
    }

    /// Record a processed marker; the first live processed result is kept
    pub fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        result: Option<Value>,
    ) -> IdempotencyRecord {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(event_id) {
            if !self.is_expired(entry, now) {
                if !entry.record.processed {
                    entry.record.processed = true;
                    entry.record.result = result;
                    entry.record.event_type = event_type.to_string();
                    entry.record.updated_at = chrono::Utc::now();
                }
                entry.written_at = now;
                return entry.record.clone();
            }
        }

        let record = IdempotencyRecord::processed(event_id, event_type, result);
        self.admit(&mut entries, now, record.clone());
        record
    }

    /// Drop an unprocessed reservation
    pub fn release(&self, event_id: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(event_id) {
            Some(entry) if !entry.record.processed => {
                entries.remove(event_id);
                true
            }
            _ => false,
        }
    }

    /// Live processed records, oldest first (used to promote to the durable tier)
    pub fn processed_records(&self) -> Vec<IdempotencyRecord> {
        let now = self.clock.now();
        let entries = self.entries.lock();

        let mut live: Vec<&FallbackEntry> = entries
            .values()
            .filter(|entry| entry.record.processed && !self.is_expired(entry, now))
            .collect();
        live.sort_by_key(|entry| entry.written_at);
        live.into_iter().map(|entry| entry.record.clone()).collect()
    }

    pub fn remove(&self, event_id: &str) -> bool {
        self.entries.lock().remove(event_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    fn is_expired(&self, entry: &FallbackEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.written_at) >= self.ttl
    }

    fn admit(
        &self,
        entries: &mut HashMap<String, FallbackEntry>,
        now: Instant,
        record: IdempotencyRecord,
    ) {
        if !entries.contains_key(&record.event_id) && entries.len() >= self.max_entries {
            let before = entries.len();
            entries.retain(|_, entry| !self.is_expired(entry, now));
            let swept = before - entries.len();
            if swept > 0 {
                debug!(swept = swept, "Swept expired idempotency fallback entries");
            }

            while entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.written_at)
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        entries.remove(&key);
                        warn!(
                            event_id = %key,
                            max_entries = self.max_entries,
                            "Idempotency fallback full, evicted oldest entry"
                        );
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            record.event_id.clone(),
            FallbackEntry {
                record,
                written_at: now,
            },
        );
    }
}
