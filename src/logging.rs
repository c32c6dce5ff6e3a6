//! # Structured Logging Module
//!
//! Environment-aware structured logging for the resilience layer. Development
//! and test runs get human-readable console output at `debug`; production gets
//! JSON lines at `info`. `RUST_LOG` always wins when set.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let console_layer = if environment == "production" {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(console_layer.with_filter(filter))
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("RESILIENCE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "test" => "debug",
        "development" => "debug",
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for idempotency operations
pub fn log_idempotency_operation(
    operation: &str,
    event_id: &str,
    event_type: Option<&str>,
    outcome: &str,
    backend: &str,
) {
    tracing::debug!(
        operation = %operation,
        event_id = %event_id,
        event_type = event_type,
        outcome = %outcome,
        backend = %backend,
        timestamp = %Utc::now().to_rfc3339(),
        "IDEMPOTENCY_OPERATION"
    );
}

/// Log a durable-tier failure that the idempotency store absorbed or surfaced
pub fn log_degraded_operation(operation: &str, event_id: &str, error: &str, fallback_enabled: bool) {
    tracing::warn!(
        operation = %operation,
        event_id = %event_id,
        error = %error,
        fallback_enabled = fallback_enabled,
        timestamp = %Utc::now().to_rfc3339(),
        "IDEMPOTENCY_DEGRADED"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
