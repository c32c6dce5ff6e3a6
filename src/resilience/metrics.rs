//! # Circuit Breaker Status
//!
//! Read-only snapshots of circuit breaker state for health endpoints, alerting
//! and logs. Snapshots are plain data: taking one never mutates a breaker.

use crate::resilience::{CircuitBreakerConfig, CircuitState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Snapshot of a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Component name the breaker guards
    pub name: String,

    /// Current circuit breaker state
    pub state: CircuitState,

    /// Whether the breaker enforces state (false = pass-through)
    pub enabled: bool,

    /// Consecutive qualifying failures (closed) or trial failures (half-open)
    pub failure_count: u32,

    /// Successful trial calls in the current half-open window
    pub success_count: u32,

    /// Calls that reached the protected operation or were rejected
    pub total_calls: u64,

    /// Calls that failed with an error counted against the dependency
    pub total_failures: u64,

    /// Calls that succeeded
    pub total_successes: u64,

    /// Calls rejected while open without invoking the operation
    pub rejected_calls: u64,

    /// Errors that the failure predicate excluded from breaker bookkeeping
    pub ignored_errors: u64,

    /// Display form of the most recent counted failure
    pub last_failure_reason: Option<String>,

    /// Time elapsed since the most recent counted failure
    pub since_last_failure: Option<Duration>,

    /// Failures divided by completed calls (0.0 to 1.0)
    pub failure_rate: f64,

    /// Average duration of successful calls
    pub average_duration: Duration,

    /// Configuration summary
    pub config: CircuitBreakerConfig,
}

/// Completed calls needed before the failure rate counts against health
pub const MIN_CALLS_FOR_HEALTH: u64 = 10;

/// Failure rate at or above which a closed breaker reports unhealthy
pub const UNHEALTHY_FAILURE_RATE: f64 = 0.1;

impl CircuitBreakerStatus {
    /// Calls that ran the protected operation to completion (rejections excluded)
    pub fn completed_calls(&self) -> u64 {
        self.total_successes + self.total_failures + self.ignored_errors
    }

    /// Check if the snapshot indicates healthy operation.
    ///
    /// Only a closed breaker is healthy; half-open is still probing the
    /// dependency. Below [`MIN_CALLS_FOR_HEALTH`] completed calls the failure
    /// rate is not judged.
    pub fn is_healthy(&self) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.completed_calls() < MIN_CALLS_FOR_HEALTH
                    || self.failure_rate < UNHEALTHY_FAILURE_RATE
            }
            CircuitState::Open | CircuitState::HalfOpen => false,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing dependency health",
        }
    }

    /// Format status for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | Calls: {} | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.name,
            self.state_description(),
            self.total_calls,
            self.total_failures,
            self.rejected_calls,
            self.average_duration.as_millis()
        )
    }
}

/// System-wide circuit breaker status aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerStatus {
    /// Status of individual circuit breakers by name
    pub circuit_breakers: HashMap<String, CircuitBreakerStatus>,

    /// Timestamp of collection
    pub collected_at: SystemTime,
}

impl SystemCircuitBreakerStatus {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: SystemTime::now(),
        }
    }

    /// Add the status of a circuit breaker
    pub fn add_circuit_breaker(&mut self, status: CircuitBreakerStatus) {
        self.circuit_breakers.insert(status.name.clone(), status);
        self.collected_at = SystemTime::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for status in self.circuit_breakers.values() {
            *counts.entry(status.state).or_insert(0) += 1;
        }

        counts
    }

    /// Get names of unhealthy circuit breakers, sorted
    pub fn unhealthy_circuits(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .circuit_breakers
            .values()
            .filter(|status| !status.is_healthy())
            .map(|status| status.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|status| status.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    /// Get total calls across all circuit breakers
    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|s| s.total_calls).sum()
    }

    /// Get total failures across all circuit breakers
    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|s| s.total_failures).sum()
    }

    /// Get system-wide failure rate
    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }

        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let closed_count = state_counts.get(&CircuitState::Closed).unwrap_or(&0);
        let open_count = state_counts.get(&CircuitState::Open).unwrap_or(&0);
        let half_open_count = state_counts.get(&CircuitState::HalfOpen).unwrap_or(&0);

        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | System failure rate: {:.2}%",
            self.circuit_breakers.len(),
            closed_count,
            open_count,
            half_open_count,
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, state: CircuitState, calls: u64, failures: u64) -> CircuitBreakerStatus {
        let completed = calls.max(1);
        CircuitBreakerStatus {
            name: name.to_string(),
            state,
            enabled: true,
            failure_count: 0,
            success_count: 0,
            total_calls: calls,
            total_failures: failures,
            total_successes: calls - failures,
            rejected_calls: 0,
            ignored_errors: 0,
            last_failure_reason: None,
            since_last_failure: None,
            failure_rate: failures as f64 / completed as f64,
            average_duration: Duration::ZERO,
            config: CircuitBreakerConfig::default(),
        }
    }

    #[test]
    fn test_system_status_aggregation() {
        let mut system = SystemCircuitBreakerStatus::new();
        system.add_circuit_breaker(status("database", CircuitState::Closed, 100, 5));
        system.add_circuit_breaker(status("mail_carrier", CircuitState::Open, 50, 25));

        assert_eq!(system.total_calls(), 150);
        assert_eq!(system.total_failures(), 30);
        assert_eq!(system.system_failure_rate(), 0.2);

        let state_counts = system.count_by_state();
        assert_eq!(state_counts.get(&CircuitState::Closed), Some(&1));
        assert_eq!(state_counts.get(&CircuitState::Open), Some(&1));

        // 1 healthy out of 2
        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.unhealthy_circuits(), vec!["mail_carrier"]);
    }

    #[test]
    fn test_status_health_calculation() {
        let mut snapshot = status("geocoder", CircuitState::Closed, 100, 5);
        assert!(snapshot.is_healthy());

        // Unhealthy closed state (high failure rate)
        snapshot.failure_rate = 0.15;
        assert!(!snapshot.is_healthy());

        // Open state is never healthy
        snapshot.state = CircuitState::Open;
        snapshot.failure_rate = 0.0;
        assert!(!snapshot.is_healthy());

        // Half-open is still probing the dependency
        snapshot.state = CircuitState::HalfOpen;
        assert!(!snapshot.is_healthy());
    }

    #[test]
    fn test_failure_rate_ignored_below_minimum_calls() {
        let mut snapshot = status("geocoder", CircuitState::Closed, 4, 2);
        assert_eq!(snapshot.completed_calls(), 4);
        assert!(snapshot.is_healthy());

        // Rejections are not completed calls
        snapshot.rejected_calls = 50;
        snapshot.total_calls = 54;
        assert!(snapshot.is_healthy());
    }

    #[test]
    fn test_empty_system_is_healthy() {
        let system = SystemCircuitBreakerStatus::default();
        assert_eq!(system.health_score(), 1.0);
        assert_eq!(system.system_failure_rate(), 0.0);
        assert!(system.format_summary().contains("0 total"));
    }
}
