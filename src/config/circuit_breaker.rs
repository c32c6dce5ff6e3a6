use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::error::{ConfigResult, ConfigurationError};

/// Circuit breaker configuration with HashMap-based component flexibility
///
/// Components without an entry in `component_configs` use `default_config`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    /// Whether circuit breakers are enabled globally
    pub enabled: bool,

    /// Global circuit breaker settings
    pub global_settings: GlobalCircuitBreakerSettings,

    /// Default configuration for new circuit breakers
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations for named components
    #[serde(default)]
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

/// Settings that apply to the registry as a whole
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GlobalCircuitBreakerSettings {
    /// Registry size above which creation logs a warning
    pub max_circuit_breakers: usize,
}

/// Circuit breaker configuration for a specific component
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerComponentConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before attempting recovery (milliseconds)
    pub timeout_ms: u64,

    /// Number of successful calls in half-open state to close circuit
    pub success_threshold: u32,

    /// Maximum concurrent half-open trial calls; unset admits every caller
    #[serde(default)]
    pub half_open_max_trials: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        let mut component_configs = HashMap::new();
        component_configs.insert(
            "payment_processor".to_string(),
            CircuitBreakerComponentConfig::from_resilience_config(
                &crate::resilience::CircuitBreakerConfig::for_payment_processor(),
            ),
        );
        component_configs.insert(
            "database".to_string(),
            CircuitBreakerComponentConfig::from_resilience_config(
                &crate::resilience::CircuitBreakerConfig::for_database(),
            ),
        );

        Self {
            enabled: true,
            global_settings: GlobalCircuitBreakerSettings {
                max_circuit_breakers: 50,
            },
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs,
        }
    }
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self::from_resilience_config(&crate::resilience::CircuitBreakerConfig::for_external_api())
    }
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific component
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.global_settings.max_circuit_breakers == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breakers.global_settings.max_circuit_breakers",
                "0",
                "must be greater than 0",
            ));
        }

        self.default_config
            .to_resilience_config()
            .validate()
            .map_err(|reason| {
                ConfigurationError::validation_error(format!(
                    "circuit_breakers.default_config: {reason}"
                ))
            })?;

        for (component, component_config) in &self.component_configs {
            component_config
                .to_resilience_config()
                .validate()
                .map_err(|reason| {
                    ConfigurationError::validation_error(format!(
                        "circuit_breakers.component_configs.{component}: {reason}"
                    ))
                })?;
        }

        Ok(())
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_millis(self.timeout_ms),
            success_threshold: self.success_threshold,
            half_open_max_trials: self.half_open_max_trials,
        }
    }

    pub fn from_resilience_config(config: &crate::resilience::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            timeout_ms: config.timeout.as_millis() as u64,
            success_threshold: config.success_threshold,
            half_open_max_trials: config.half_open_max_trials,
        }
    }
}
