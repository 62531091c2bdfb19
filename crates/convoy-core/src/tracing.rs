//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when set.

use ::tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::ConfigError;

/// Install the global subscriber. Returns `Ok(false)` when one is already
/// installed (tests, embedding hosts), which is not an error.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = build_filter(config)?;

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };

    Ok(result.is_ok())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(&config.level)
        .map_err(|e| ConfigError::Tracing(format!("invalid log filter '{}': {e}", config.level)))
}
