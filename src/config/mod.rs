//! # Resilience Configuration
//!
//! File- and environment-driven settings for every component of the layer.
//! Durations are integers (`*_ms`, `*_seconds`) in files and environment
//! overrides; the adapters on each section turn them into runtime types.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults ([`ResilienceConfig::default`])
//! 2. Optional TOML file (`RESILIENCE_CONFIG_PATH`)
//! 3. Environment overrides, e.g. `RESILIENCE_IDEMPOTENCY__FALLBACK_ENABLED=false`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use resilience_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let policy = config.retry.to_policy();
//! let payment = config.circuit_breakers.config_for_component("payment_processor");
//! # let _ = (policy, payment);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use circuit_breaker::{
    CircuitBreakerComponentConfig, CircuitBreakerConfig, GlobalCircuitBreakerSettings,
};
pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use crate::cache::MAX_LOCAL_TTL;
use crate::resilience::RetryPolicy;

/// Root configuration for the resilience layer
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl ResilienceConfig {
    /// Validate every section, reporting the first problem found
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breakers.validate()?;
        self.retry.validate()?;
        self.idempotency.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    /// Settings suited to unit and integration tests: short windows, small maps
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.circuit_breakers.default_config = CircuitBreakerComponentConfig {
            failure_threshold: 2,
            timeout_ms: 100,
            success_threshold: 1,
            half_open_max_trials: None,
        };
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            exponential_base: 2.0,
            jitter_fraction: 0.0,
        };
        config.idempotency.fallback_max_entries = 100;
        config.idempotency.fallback_ttl_seconds = 60;
        config.cache.local_max_entries = 100;
        config
    }
}

/// Retry policy as written in configuration files
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_policy(&RetryPolicy::default())
    }
}

impl RetryConfig {
    /// Convert to the runtime retry policy
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter_fraction: self.jitter_fraction,
        }
    }

    pub fn from_policy(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            exponential_base: policy.exponential_base,
            jitter_fraction: policy.jitter_fraction,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.to_policy()
            .validate()
            .map_err(|reason| ConfigurationError::validation_error(format!("retry: {reason}")))
    }
}

/// Idempotency store settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IdempotencyConfig {
    /// Serve from the in-process fallback tier when the durable ledger errors.
    /// When false the store fails closed during an outage.
    pub fallback_enabled: bool,

    /// Bound on fallback entries before the age sweep and oldest-first eviction
    pub fallback_max_entries: usize,

    /// Age after which fallback entries read as misses and become evictable
    pub fallback_ttl_seconds: u64,

    /// Age after which an unprocessed reservation may be taken over
    pub reservation_timeout_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            fallback_max_entries: 10_000,
            fallback_ttl_seconds: 3_600,
            reservation_timeout_seconds: 300,
        }
    }
}

impl IdempotencyConfig {
    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_secs(self.fallback_ttl_seconds)
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.fallback_max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "idempotency.fallback_max_entries",
                "0",
                "must be greater than 0",
            ));
        }

        if self.fallback_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "idempotency.fallback_ttl_seconds",
                "0",
                "must be greater than 0",
            ));
        }

        if self.reservation_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "idempotency.reservation_timeout_seconds",
                "0",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Two-tier cache settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// TTL used by `set` callers that do not pass one
    pub default_ttl_seconds: u64,

    /// Bound on entries in the in-process tier
    pub local_max_entries: usize,

    /// Guard the external tier with the `cache` circuit breaker
    pub use_circuit_breaker: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3_600,
            local_max_entries: 10_000,
            use_circuit_breaker: true,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.default_ttl_seconds",
                "0",
                "must be greater than 0",
            ));
        }

        if self.default_ttl() > MAX_LOCAL_TTL {
            return Err(ConfigurationError::invalid_value(
                "cache.default_ttl_seconds",
                self.default_ttl_seconds.to_string(),
                format!("must be at most {} seconds", MAX_LOCAL_TTL.as_secs()),
            ));
        }

        if self.local_max_entries == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.local_max_entries",
                "0",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}
