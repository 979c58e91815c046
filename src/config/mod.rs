//! Configuration module for the Mauka fingerprint set.
//!
//! This module provides a configuration system that can load settings
//! from files (TOML, YAML, JSON) and override them with environment variables.
//! All configuration values are validated for correctness before use.

use crate::error::config::ConfigError;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod memory;
pub mod storage;

pub use memory::MemoryConfig;
pub use storage::StorageConfig;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "FPSET";

/// A trait for types that can be validated.
pub trait Validate {
    /// Validates that the configuration is correct.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the configuration is valid
    /// * `Err(ConfigError)` if the configuration is invalid
    fn validate(&self) -> ConfigResult<()>;
}

/// Which fingerprint set implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FpSetKind {
    /// Unbounded concurrent hash set kept entirely in memory.
    Memory,
    /// Memory-bounded table that overflows to disk pages.
    #[default]
    Disk,
}

/// Main configuration for the fingerprint set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FpSetConfig {
    /// Implementation selector
    pub kind: FpSetKind,

    /// Memory budget and table geometry
    pub memory: MemoryConfig,

    /// Overflow page and checkpoint file settings
    pub storage: StorageConfig,

    /// Log configuration
    pub log: LogConfig,
}

impl FpSetConfig {
    /// Renders the configuration as a TOML document.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::RenderError(e.to_string()))
    }
}

impl Validate for FpSetConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.memory.validate()?;
        self.storage.validate()?;
        self.log.validate()?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to log in JSON format
    pub json: bool,

    /// Whether to include source code locations in logs
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            source_location: true,
        }
    }
}

impl Validate for LogConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}",
                self.level
            ))),
        }
    }
}

/// Configuration loader for the fingerprint set.
#[derive(Debug)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to the configuration file
    /// * `env_prefix` - Prefix for environment variables that override configuration values
    pub fn new<P: AsRef<Path>>(config_path: Option<P>, env_prefix: &str) -> Self {
        Self {
            config_path: config_path.map(|p| p.as_ref().to_path_buf()),
            env_prefix: env_prefix.to_string(),
        }
    }

    /// Loads the configuration from defaults, an optional file and environment variables.
    ///
    /// Environment overrides take the form `PREFIX__SECTION__KEY`, e.g.
    /// `FPSET__MEMORY__BUDGET_BYTES=1073741824`.
    pub fn load(&self) -> ConfigResult<FpSetConfig> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&FpSetConfig::default())
                .map_err(|e| ConfigError::parse("defaults", e))?,
        );

        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }

            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("json") => FileFormat::Json,
                Some("yaml" | "yml") => FileFormat::Yaml,
                _ => return Err(ConfigError::UnsupportedFormat(path.clone())),
            };
            builder = builder.add_source(File::from(path.as_path()).format(format));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let origin = match &self.config_path {
            Some(path) => format!("{} or {}__* environment", path.display(), self.env_prefix),
            None => format!("{}__* environment", self.env_prefix),
        };
        let config: FpSetConfig = builder
            .build()
            .map_err(|e| ConfigError::parse(origin.as_str(), e))?
            .try_deserialize()
            .map_err(|e| ConfigError::parse(origin.as_str(), e))?;

        config.validate()?;
        Ok(config)
    }
}
