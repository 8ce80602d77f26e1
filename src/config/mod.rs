//! # Reconciler Configuration
//!
//! Settings for the controller, the stage sequencer, the requeue policy and
//! the artifacts the reconciler renders.
//!
//! ## Sources
//!
//! Loaded by [`ConfigManager`] in layers, later layers winning:
//!
//! 1. Built-in defaults ([`ReconcilerConfig::default`])
//! 2. `config/heat-reconciler.{toml,yaml}` or an explicit file
//! 3. Environment variables prefixed `HEAT_RECONCILER`, `__` separated
//!    (e.g. `HEAT_RECONCILER__BACKOFF__MAX_DELAY_SECONDS=60`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use heat_reconciler::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ceiling = manager.config().backoff.max_delay();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Work queue settings
    pub controller: ControllerConfig,

    /// Stage evaluation settings
    pub sequencing: SequencingConfig,

    /// Retry delays for passes that did not converge
    pub backoff: BackoffConfig,

    /// Requeue behaviour for converged instances
    pub requeue: RequeueConfig,

    /// Images used for rendered workloads
    pub defaults: DefaultsConfig,

    pub logging: LoggingConfig,
}

impl ReconcilerConfig {
    /// Reject values the reconciler cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.controller.max_concurrent_reconciles == 0 {
            return Err(ConfigurationError::invalid_value(
                "controller.max_concurrent_reconciles",
                0,
                "at least one reconcile must be allowed to run",
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                self.backoff.multiplier,
                "multiplier must be >= 1.0",
            ));
        }
        if self.backoff.base_delay() > self.backoff.max_delay() {
            return Err(ConfigurationError::invalid_value(
                "backoff.base_delay_ms",
                self.backoff.base_delay_ms,
                format!(
                    "base delay exceeds the {}s ceiling",
                    self.backoff.max_delay_seconds
                ),
            ));
        }
        for (field, image) in [
            ("defaults.api_image", &self.defaults.api_image),
            ("defaults.cfnapi_image", &self.defaults.cfnapi_image),
            ("defaults.engine_image", &self.defaults.engine_image),
        ] {
            if image.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "",
                    "container image must not be empty",
                ));
            }
        }
        Ok(())
    }
}

/// Work queue configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Distinct instances reconciled in parallel
    pub max_concurrent_reconciles: usize,
    /// Restrict the controller to one namespace
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
            watch_namespace: None,
        }
    }
}

/// How stages past a non-ready stage are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencingMode {
    /// The first non-ready stage in topological order ends the pass
    #[default]
    HaltOnFirst,
    /// A non-ready stage only blocks the stages that depend on it
    IndependentBranches,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SequencingConfig {
    pub mode: SequencingMode,
}

/// Exponential backoff for passes waiting on collaborators or failing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_seconds: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_seconds: 300,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_seconds)
    }

    /// Delay before retry number `attempt` (0-based), capped at the ceiling
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay().as_millis() as f64);
        Duration::from_millis(millis as u64).min(self.max_delay())
    }
}

/// Requeue behaviour for converged instances
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RequeueConfig {
    /// Periodic resync of fully ready instances; `None` relies on watch events only
    pub resync_ready_seconds: Option<u64>,
}

impl RequeueConfig {
    pub fn resync_ready(&self) -> Option<Duration> {
        self.resync_ready_seconds.map(Duration::from_secs)
    }
}

/// Container images for rendered workloads
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub api_image: String,
    pub cfnapi_image: String,
    pub engine_image: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            api_image: "quay.io/podified-antelope-centos9/openstack-heat-api:current-podified"
                .to_string(),
            cfnapi_image:
                "quay.io/podified-antelope-centos9/openstack-heat-api-cfn:current-podified"
                    .to_string(),
            engine_image:
                "quay.io/podified-antelope-centos9/openstack-heat-engine:current-podified"
                    .to_string(),
        }
    }
}

/// Logging settings; `level` overrides the environment default
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ReconcilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequencing.mode, SequencingMode::HaltOnFirst);
        assert_eq!(config.controller.max_concurrent_reconciles, 4);
        assert!(config.requeue.resync_ready().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ReconcilerConfig::default();
        config.controller.max_concurrent_reconciles = 0;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.backoff.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.backoff.base_delay_ms = 10_000;
        config.backoff.max_delay_seconds = 1;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.defaults.engine_image = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            base_delay_ms: 100,
            max_delay_seconds: 1,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_sequencing_mode_serde() {
        let mode: SequencingMode = serde_json::from_str("\"independent_branches\"").unwrap();
        assert_eq!(mode, SequencingMode::IndependentBranches);
    }
}
