// src/utils/config.rs
//! Engine configuration
//!
//! Configuration is layered: built-in defaults, an optional
//! `override-engine.{toml,yaml,json}` file in the working directory, then
//! `OVERRIDE_ENGINE__*` environment variables.

use crate::codec::FileNamePolicy;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub overrides: OverridesConfig,
    pub observability: ObservabilityConfig,
}

/// Local override behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverridesConfig {
    /// Master switch for local overrides
    pub enabled: bool,

    /// Apply `.headers` descriptors to intercepted responses
    pub header_overrides_enabled: bool,

    /// File name escaping policy for the override tree
    pub filename_policy: FileNamePolicySetting,

    /// Combined root + path length above which paths are shortened
    pub long_path_budget: usize,

    /// Quiescence window for interception pattern rebuilds (milliseconds)
    pub rebuild_throttle_ms: u64,

    /// Override root used by the command line tool
    pub root: String,
}

impl Default for OverridesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_overrides_enabled: true,
            filename_policy: FileNamePolicySetting::Auto,
            long_path_budget: 200,
            rebuild_throttle_ms: 50,
            root: "file:///overrides".to_string(),
        }
    }
}

impl OverridesConfig {
    pub fn rebuild_throttle(&self) -> Duration {
        Duration::from_millis(self.rebuild_throttle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.long_path_budget == 0 {
            return Err(EngineError::ConfigError(
                "long_path_budget must be greater than 0".to_string(),
            ));
        }
        if self.rebuild_throttle_ms == 0 {
            return Err(EngineError::ConfigError(
                "rebuild_throttle_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn file_name_policy(&self) -> FileNamePolicy {
        match self.filename_policy {
            FileNamePolicySetting::Auto => FileNamePolicy::host(),
            FileNamePolicySetting::Windows => FileNamePolicy::Windows,
            FileNamePolicySetting::Posix => FileNamePolicy::Posix,
        }
    }
}

/// How the file name policy is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNamePolicySetting {
    /// Follow the host platform
    Auto,
    Windows,
    Posix,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines instead of human readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file and environment
    pub fn load() -> Result<Self> {
        Self::load_from("override-engine")
    }

    /// Load configuration from a named file (extension optional) and environment
    pub fn load_from(name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("OVERRIDE_ENGINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        self.overrides.validate()
    }
}
