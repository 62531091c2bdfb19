//! Configuration errors.

use std::path::PathBuf;

use super::error_code::{self, ConvoyErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid revision chain {path}: {message}")]
    Chain { path: PathBuf, message: String },

    #[error("Tracing setup failed: {0}")]
    Tracing(String),
}

impl ConvoyErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        error_code::CONFIG_ERROR
    }
}
