//! # Circuit Breaker Configuration
//!
//! Runtime configuration for a single circuit breaker.
//!
//! **Note**: system-wide, file-driven settings live in `crate::config::CircuitBreakerConfig`;
//! its component entries convert into this struct via `to_resilience_config()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Cooldown to wait in open state before attempting recovery
    pub timeout: Duration,

    /// Number of successful calls in half-open state to close circuit
    pub success_threshold: u32,

    /// Maximum concurrent trial calls while half-open; `None` admits every caller
    #[serde(default)]
    pub half_open_max_trials: Option<u32>,
}

impl CircuitBreakerConfig {
    /// Create configuration for database operations
    pub fn for_database() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_trials: None,
        }
    }

    /// Create configuration for queue operations
    pub fn for_queue() -> Self {
        Self {
            failure_threshold: 3,
            timeout: Duration::from_secs(15),
            success_threshold: 2,
            half_open_max_trials: None,
        }
    }

    /// Create configuration for external API calls
    pub fn for_external_api() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(45),
            success_threshold: 2,
            half_open_max_trials: None,
        }
    }

    /// Create configuration for payment processor calls.
    ///
    /// Trips early and tests recovery with a single trial call, since a recovering
    /// processor should not see a burst of charge attempts.
    pub fn for_payment_processor() -> Self {
        Self {
            failure_threshold: 3,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_trials: Some(1),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(300) {
            return Err("timeout should not exceed 300 seconds".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.success_threshold > 50 {
            return Err("success_threshold should not exceed 50".to_string());
        }

        if self.half_open_max_trials == Some(0) {
            return Err("half_open_max_trials must be greater than 0 when set".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_trials: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        // Valid config should pass
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        // Invalid failure threshold
        let mut invalid_config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        // Invalid timeout
        invalid_config = CircuitBreakerConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        // Invalid success threshold
        invalid_config = CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        // A trial gate of zero would never admit a trial call
        invalid_config = CircuitBreakerConfig {
            half_open_max_trials: Some(0),
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_preset_configurations() {
        let db_config = CircuitBreakerConfig::for_database();
        assert_eq!(db_config.failure_threshold, 5);
        assert!(db_config.validate().is_ok());

        let queue_config = CircuitBreakerConfig::for_queue();
        assert_eq!(queue_config.failure_threshold, 3);
        assert!(queue_config.validate().is_ok());

        let api_config = CircuitBreakerConfig::for_external_api();
        assert_eq!(api_config.timeout, Duration::from_secs(45));
        assert!(api_config.validate().is_ok());

        let payment_config = CircuitBreakerConfig::for_payment_processor();
        assert_eq!(payment_config.half_open_max_trials, Some(1));
        assert!(payment_config.validate().is_ok());
    }
}
