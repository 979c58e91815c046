//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; embedding programs and tests call
//! [`init_logging`] once to route them somewhere.

use crate::config::LogConfig;
use crate::error::config::ConfigError;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from a [`LogConfig`].
///
/// `RUST_LOG` takes precedence over the configured level when set. Fails if a
/// global subscriber has already been installed.
pub fn init_logging(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ConfigError::ValidationError(format!("Invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(config.source_location)
        .with_file(config.source_location)
        .with_thread_names(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    result.map_err(|e| {
        ConfigError::ValidationError(format!("Failed to set global tracing subscriber: {e}"))
    })
}
