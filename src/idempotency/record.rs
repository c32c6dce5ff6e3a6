//! Idempotency ledger records and reservation outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// One row of the idempotency ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub event_id: String,
    /// Diagnostic only; never part of the key
    pub event_type: String,
    pub processed: bool,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// New unprocessed reservation
    pub fn reserved(event_id: &str, event_type: &str) -> Self {
        let now = Utc::now();
        Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            processed: false,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// New processed record
    pub fn processed(event_id: &str, event_type: &str, result: Option<Value>) -> Self {
        Self {
            processed: true,
            result,
            ..Self::reserved(event_id, event_type)
        }
    }

    /// An unprocessed reservation whose holder has not touched it for `stale_after`
    pub fn is_stale_reservation(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.processed {
            return false;
        }
        match chrono::Duration::from_std(stale_after) {
            Ok(stale_after) => self.updated_at + stale_after <= now,
            Err(_) => false,
        }
    }

    pub fn state(&self) -> ProcessedState {
        if self.processed {
            ProcessedState::processed(self.result.clone())
        } else {
            ProcessedState::not_processed()
        }
    }
}

/// Answer to "has this event been processed?"
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessedState {
    pub processed: bool,
    pub result: Option<Value>,
}

impl ProcessedState {
    pub fn not_processed() -> Self {
        Self::default()
    }

    pub fn processed(result: Option<Value>) -> Self {
        Self {
            processed: true,
            result,
        }
    }

    pub fn into_parts(self) -> (bool, Option<Value>) {
        (self.processed, self.result)
    }
}

/// Outcome of reserving an event before running its side effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reservation {
    /// This caller holds the reservation and must run the side effect, then commit or release
    Acquired,

    /// The side effect already ran; `result` is what the first writer stored
    AlreadyProcessed { result: Option<Value> },

    /// Another handler holds a live reservation
    InProgress,
}

impl Reservation {
    /// True for every outcome except [`Reservation::Acquired`]: the caller must skip the side effect
    pub fn already_processed(&self) -> bool {
        !self.is_acquired()
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, Reservation::Acquired)
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Reservation::AlreadyProcessed { result } => result.as_ref(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reservation::Acquired => "acquired",
            Reservation::AlreadyProcessed { .. } => "already_processed",
            Reservation::InProgress => "in_progress",
        }
    }
}

/// Ledger-level reservation outcome
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// A new (or taken-over stale) reservation now belongs to the caller
    Reserved,

    /// A record already exists; the caller did not get the reservation
    Existing(IdempotencyRecord),
}

impl From<ReserveOutcome> for Reservation {
    fn from(outcome: ReserveOutcome) -> Self {
        match outcome {
            ReserveOutcome::Reserved => Reservation::Acquired,
            ReserveOutcome::Existing(record) if record.processed => Reservation::AlreadyProcessed {
                result: record.result,
            },
            ReserveOutcome::Existing(_) => Reservation::InProgress,
        }
    }
}
