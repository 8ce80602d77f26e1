//! Configuration Loader
//!
//! Layers built-in defaults, an optional file and environment overrides with
//! the `config` crate, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::ReconcilerConfig;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HEAT_RECONCILER";
const ENV_SEPARATOR: &str = "__";
/// Default file searched (any supported extension) when no path is given
const DEFAULT_CONFIG_BASENAME: &str = "config/heat-reconciler";

/// Loaded and validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: ReconcilerConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load defaults, the default config file if present, and environment overrides
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::build(None, None)
    }

    /// Load with an explicit configuration file, which must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::build(Some(path), None)
    }

    /// Load with an explicit file and a fixed set of override variables instead
    /// of the process environment. Keeps tests independent of global state.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(path, Some(overrides))
    }

    fn build(
        path: Option<&Path>,
        env_overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        debug!(
            environment = %environment,
            file = ?path.map(Path::display),
            "Loading reconciler configuration"
        );

        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_BASENAME).required(false),
        };

        let config: ReconcilerConfig = config::Config::builder()
            .add_source(config::Config::try_from(&ReconcilerConfig::default())?)
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(env_overrides),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            environment = %environment,
            sequencing = ?config.sequencing.mode,
            max_concurrent_reconciles = config.controller.max_concurrent_reconciles,
            backoff_ceiling_seconds = config.backoff.max_delay_seconds,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_file: path.map(Path::to_path_buf),
        }))
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    /// Configuration as JSON with sensitive-looking fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::json!(self.config);
        Self::sanitize_json_recursive(&mut value, &["password", "secret", "key", "token"]);
        value
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if sensitive_patterns.iter().any(|p| key_lower.contains(p)) {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    /// HEAT_RECONCILER_ENV || APP_ENV || 'development'
    pub(crate) fn detect_environment() -> String {
        env::var("HEAT_RECONCILER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}
