//! # Circuit Breaker Manager
//!
//! Registry of circuit breakers keyed by dependency name. Breakers are created
//! lazily on first use from the component configuration and live until the
//! manager is shut down. The manager is an owned value passed to callers
//! explicitly; clones share the same registry.

use crate::clock::{system_clock, Clock};
use crate::config::CircuitBreakerConfig;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState,
    SystemCircuitBreakerStatus,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type ResilienceBreakerConfig = crate::resilience::CircuitBreakerConfig;

/// Manager for multiple circuit breakers across external dependencies
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by component name
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,

    /// Configuration
    config: Arc<CircuitBreakerConfig>,

    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    /// Create new circuit breaker manager from configuration
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a manager whose breakers read time from `clock`
    pub fn with_clock(config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            enabled = config.enabled,
            configured_components = config.component_configs.len(),
            max_circuit_breakers = config.global_settings.max_circuit_breakers,
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(DashMap::new()),
            config: Arc::new(config.clone()),
            clock,
        }
    }

    /// Get or create the circuit breaker for a component using its configured settings
    pub fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            return Arc::clone(breaker.value());
        }

        let component_config = self
            .config
            .config_for_component(component_name)
            .to_resilience_config();
        self.register(component_name, component_config)
    }

    /// Get or create a circuit breaker with an explicit configuration.
    ///
    /// The configuration only applies when the breaker does not exist yet.
    pub fn get_or_create_with(
        &self,
        component_name: &str,
        config: ResilienceBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.get(component_name) {
            if breaker.config() != &config {
                debug!(
                    component = component_name,
                    "Circuit breaker already registered, ignoring supplied configuration"
                );
            }
            return Arc::clone(breaker.value());
        }

        self.register(component_name, config)
    }

    fn register(&self, component_name: &str, config: ResilienceBreakerConfig) -> Arc<CircuitBreaker> {
        // Read the size before taking the entry lock; len() visits every shard
        let current_count = self.circuit_breakers.len();
        let max_allowed = self.config.global_settings.max_circuit_breakers;
        if current_count >= max_allowed {
            warn!(
                component = component_name,
                current_count = current_count,
                max_allowed = max_allowed,
                "Maximum circuit breaker limit reached, creating anyway"
            );
        }

        let entry = self
            .circuit_breakers
            .entry(component_name.to_string())
            .or_insert_with(|| {
                info!(component = component_name, "Created new circuit breaker");
                let clock = Arc::clone(&self.clock);
                if self.config.enabled {
                    Arc::new(CircuitBreaker::with_clock(
                        component_name.to_string(),
                        config,
                        clock,
                    ))
                } else {
                    Arc::new(CircuitBreaker::pass_through(
                        component_name.to_string(),
                        config,
                        clock,
                    ))
                }
            });

        Arc::clone(entry.value())
    }

    /// Run `operation` through the named component's circuit breaker
    pub async fn guard<F, Fut, T, E>(
        &self,
        component_name: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.get_circuit_breaker(component_name)
            .call(operation)
            .await
    }

    /// Run `operation` through the named breaker, counting only errors matching `is_failure`
    pub async fn guard_filtered<F, Fut, T, E, P>(
        &self,
        component_name: &str,
        operation: F,
        is_failure: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: FnOnce(&E) -> bool,
    {
        self.get_circuit_breaker(component_name)
            .call_filtered(operation, is_failure)
            .await
    }

    /// Get all circuit breaker names, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Get status for a specific circuit breaker
    pub fn component_status(&self, component_name: &str) -> Option<CircuitBreakerStatus> {
        self.circuit_breakers
            .get(component_name)
            .map(|breaker| breaker.status())
    }

    /// Get system-wide circuit breaker status
    pub fn system_status(&self) -> SystemCircuitBreakerStatus {
        let mut system_status = SystemCircuitBreakerStatus::new();

        for entry in self.circuit_breakers.iter() {
            system_status.add_circuit_breaker(entry.value().status());
        }

        system_status
    }

    /// Get count of circuit breakers by state
    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.system_status().count_by_state()
    }

    /// Check overall health based on circuit breaker states
    pub fn system_health_score(&self) -> f64 {
        self.system_status().health_score()
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");

        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Reset all circuit breakers to closed (emergency recovery)
    pub fn reset_all(&self) {
        warn!("Resetting all circuit breakers (emergency recovery)");

        for entry in self.circuit_breakers.iter() {
            entry.value().reset();
        }
    }

    /// Remove circuit breaker for a component
    pub fn remove_circuit_breaker(&self, component_name: &str) -> bool {
        if self.circuit_breakers.remove(component_name).is_some() {
            info!(
                component = component_name,
                remaining_count = self.circuit_breakers.len(),
                "Removed circuit breaker"
            );
            true
        } else {
            false
        }
    }

    /// Log a final summary and drop every registered breaker.
    ///
    /// Callers still holding an `Arc<CircuitBreaker>` keep a working breaker,
    /// but it is no longer reachable through the registry.
    pub fn shutdown(&self) {
        let summary = self.system_status();
        info!(
            total_circuit_breakers = summary.circuit_breakers.len(),
            summary = %summary.format_summary(),
            "Shutting down circuit breaker manager"
        );
        self.circuit_breakers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerComponentConfig, GlobalCircuitBreakerSettings};

    fn create_test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            global_settings: GlobalCircuitBreakerSettings {
                max_circuit_breakers: 50,
            },
            default_config: CircuitBreakerComponentConfig {
                failure_threshold: 5,
                timeout_ms: 30_000,
                success_threshold: 2,
                half_open_max_trials: None,
            },
            component_configs: HashMap::new(),
        }
    }

    #[test]
    fn test_circuit_breaker_manager_creation() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        assert!(manager.list_components().is_empty());
        // No circuit breakers = healthy
        assert_eq!(manager.system_health_score(), 1.0);
    }

    #[test]
    fn test_get_or_create_circuit_breaker() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        let breaker1 = manager.get_circuit_breaker("payment_processor");
        assert_eq!(breaker1.name(), "payment_processor");

        let breaker2 = manager.get_circuit_breaker("payment_processor");
        assert!(Arc::ptr_eq(&breaker1, &breaker2));

        assert_eq!(manager.list_components(), vec!["payment_processor".to_string()]);
    }

    #[test]
    fn test_component_specific_configuration() {
        let mut config = create_test_config();
        config.component_configs.insert(
            "mail_carrier".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                timeout_ms: 10_000,
                success_threshold: 1,
                half_open_max_trials: Some(1),
            },
        );
        let manager = CircuitBreakerManager::from_config(&config);

        let mail = manager.get_circuit_breaker("mail_carrier");
        assert_eq!(mail.config().failure_threshold, 2);
        assert_eq!(mail.config().half_open_max_trials, Some(1));

        let geocoder = manager.get_circuit_breaker("geocoder");
        assert_eq!(geocoder.config().failure_threshold, 5);
    }

    #[test]
    fn test_explicit_config_applies_only_on_first_registration() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());
        let payment = ResilienceBreakerConfig::for_payment_processor();

        let first = manager.get_or_create_with("payment_processor", payment.clone());
        assert_eq!(first.config(), &payment);

        let other = ResilienceBreakerConfig {
            failure_threshold: 99,
            ..payment.clone()
        };
        let second = manager.get_or_create_with("payment_processor", other);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config(), &payment);

        // Named lookups share the explicitly configured breaker
        let by_name = manager.get_circuit_breaker("payment_processor");
        assert!(Arc::ptr_eq(&first, &by_name));
        assert_eq!(by_name.config().failure_threshold, payment.failure_threshold);
    }

    #[test]
    fn test_named_breaker_ignores_later_explicit_config() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());
        manager.get_circuit_breaker("geocoder");

        let breaker =
            manager.get_or_create_with("geocoder", ResilienceBreakerConfig::for_external_api());
        assert_eq!(breaker.config().timeout, std::time::Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_guard_filtered_counts_only_qualifying_errors() {
        let mut config = create_test_config();
        config.component_configs.insert(
            "mail_carrier".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 1,
                timeout_ms: 60_000,
                success_threshold: 1,
                half_open_max_trials: None,
            },
        );
        let manager = CircuitBreakerManager::from_config(&config);
        let is_outage = |e: &String| !e.starts_with('4');

        let result = manager
            .guard_filtered(
                "mail_carrier",
                || async { Err::<(), _>("404 unknown tracking number".to_string()) },
                is_outage,
            )
            .await;
        assert!(!result.unwrap_err().is_circuit_open());

        let breaker = manager.get_circuit_breaker("mail_carrier");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().ignored_errors, 1);

        let _ = manager
            .guard_filtered(
                "mail_carrier",
                || async { Err::<(), _>("503 carrier unavailable".to_string()) },
                is_outage,
            )
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = manager
            .guard_filtered("mail_carrier", || async { Ok::<_, String>(()) }, is_outage)
            .await;
        assert!(rejected.unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_system_status_aggregation() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        manager.get_circuit_breaker("payment_processor");
        manager.get_circuit_breaker("mail_carrier");
        manager.get_circuit_breaker("email_provider");

        let system_status = manager.system_status();
        assert_eq!(system_status.circuit_breakers.len(), 3);

        let state_summary = manager.get_state_summary();
        assert_eq!(state_summary.len(), 1);
        assert_eq!(state_summary.get(&CircuitState::Closed), Some(&3));

        manager.force_open_all();
        assert_eq!(manager.system_health_score(), 0.0);

        manager.reset_all();
        assert_eq!(manager.system_health_score(), 1.0);
    }

    #[test]
    fn test_remove_and_shutdown() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());
        manager.get_circuit_breaker("geocoder");
        manager.get_circuit_breaker("ai_refinement");

        assert!(manager.remove_circuit_breaker("geocoder"));
        assert!(!manager.remove_circuit_breaker("geocoder"));

        manager.shutdown();
        assert!(manager.list_components().is_empty());
    }

    #[test]
    fn test_disabled_manager_creates_pass_through_breakers() {
        let mut config = create_test_config();
        config.enabled = false;
        let manager = CircuitBreakerManager::from_config(&config);

        let breaker = manager.get_circuit_breaker("geocoder");
        assert!(!breaker.is_enabled());
    }
}
