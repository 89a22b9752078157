// src/observability/mod.rs
//! Logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary (or to an embedding application).

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::ConfigError(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    result.map_err(|e| EngineError::ConfigError(format!("Failed to install subscriber: {}", e)))
}
