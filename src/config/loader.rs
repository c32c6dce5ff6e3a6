//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `RESILIENCE_*`
//! environment overrides with the `config` crate, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::ResilienceConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the TOML file to load
pub const CONFIG_PATH_ENV: &str = "RESILIENCE_CONFIG_PATH";

/// Prefix for environment overrides; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Loads [`ResilienceConfig`] from layered sources
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from defaults, `RESILIENCE_CONFIG_PATH` (if set) and the process environment
    pub fn load() -> ConfigResult<ResilienceConfig> {
        let path = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from_sources(path.as_deref(), None)
    }

    /// Load configuration from an explicit TOML file plus the process environment
    pub fn load_from(path: &Path) -> ConfigResult<ResilienceConfig> {
        Self::load_from_sources(Some(path), None)
    }

    /// Load configuration with an explicit environment map instead of the process environment.
    ///
    /// Keys in `env_overrides` use the same form as real variables
    /// (`RESILIENCE_RETRY__MAX_ATTEMPTS`). Passing `None` reads the process
    /// environment. Tests use `Some(..)` to avoid mutating global state.
    pub fn load_from_sources(
        path: Option<&Path>,
        env_overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<ResilienceConfig> {
        let defaults = Config::try_from(&ResilienceConfig::default())
            .map_err(ConfigurationError::config_merge_error)?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(path.to_path_buf()));
            }
            debug!(path = %path.display(), "Adding configuration file source");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let override_count = env_overrides.as_ref().map(HashMap::len);
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env_overrides),
        );

        let merged = builder.build().map_err(|err| match err {
            ConfigError::FileParse { .. } => ConfigurationError::invalid_toml(
                path.map(|p| p.display().to_string()).unwrap_or_default(),
                err,
            ),
            other => ConfigurationError::config_merge_error(other),
        })?;

        let config: ResilienceConfig = merged.try_deserialize().map_err(|err| match err {
            ConfigError::Type { ref key, .. } => ConfigurationError::environment_override_error(
                key.clone().unwrap_or_else(|| "<root>".to_string()),
                &err,
            ),
            other => ConfigurationError::config_merge_error(other),
        })?;

        config.validate()?;

        info!(
            config_file = path.map(|p| p.display().to_string()).unwrap_or_default(),
            explicit_env_overrides = ?override_count,
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            configured_components = config.circuit_breakers.component_configs.len(),
            idempotency_fallback_enabled = config.idempotency.fallback_enabled,
            "Resilience configuration loaded"
        );

        Ok(config)
    }
}
