//! Configuration error module.
//!
//! Errors raised while loading, layering and validating a fingerprint set
//! configuration. Each one names the input (file, environment or key) that
//! caused it.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error when the configuration file is missing.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file extension names no supported format (toml, json, yaml).
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A configuration source could not be parsed into the settings tree.
    #[error("Failed to parse configuration from {origin}: {message}")]
    ParseError {
        /// The file path, `environment` or `defaults`
        origin: String,
        /// What the parser reported
        message: String,
    },

    /// The settings could not be rendered back into a document.
    #[error("Failed to render configuration: {0}")]
    RenderError(String),

    /// Error when validating the configuration.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    /// Error when a configuration value is out of the valid range.
    #[error("Configuration value {key} is out of valid range: {message}")]
    ValueOutOfRange {
        /// The key of the invalid value
        key: String,
        /// Description of the valid range
        message: String,
    },
}

impl ConfigError {
    /// Creates a `ParseError` for the given origin.
    pub fn parse<O: Into<String>, E: std::fmt::Display>(origin: O, error: E) -> Self {
        Self::ParseError {
            origin: origin.into(),
            message: error.to_string(),
        }
    }
}
