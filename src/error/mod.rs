//! Error module for the Mauka fingerprint set.
//!
//! This module provides the error taxonomy shared by every component of the
//! crate. Configuration problems surface before any insertion happens, storage
//! failures are propagated to the caller of the operation that triggered them,
//! and checkpoint corruption is reported with the offending path.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod config;

/// Result type alias used throughout the fingerprint set.
pub type FpSetResult<T> = Result<T, FpSetError>;

/// Core error enum for the fingerprint set.
#[derive(Error, Debug)]
pub enum FpSetError {
    /// The memory budget, directory or filename cannot be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A disk read or write failed during eviction, compaction or checkpointing.
    #[error("Storage I/O failure while {context}: {source}")]
    StorageIo {
        /// What the set was doing when the failure happened
        context: String,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A checkpoint or fingerprint file failed validation.
    #[error("Corrupt checkpoint at {path:?}: {reason}")]
    CorruptCheckpoint {
        /// File or directory that failed validation
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// `begin_chkpt` / `commit_chkpt` called out of order.
    #[error("Checkpoint protocol violation: {0}")]
    CheckpointState(String),

    /// Errors occurring during configuration loading or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] self::config::ConfigError),

    /// Manifest serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FpSetError {
    /// Creates a `CorruptCheckpoint` error for the given path.
    pub fn corrupt<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::CorruptCheckpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when the error came from the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageIo { .. })
    }
}

/// Attaches context to I/O results, turning them into `StorageIo` errors.
pub trait IoResultExt<T> {
    /// Converts the error into [`FpSetError::StorageIo`] with a lazily built context.
    fn storage_context<F, S>(self, context: F) -> FpSetResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn storage_context<F, S>(self, context: F) -> FpSetResult<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| FpSetError::StorageIo {
            context: context().into(),
            source,
        })
    }
}
