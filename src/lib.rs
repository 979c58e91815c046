//! Mauka Fingerprint Set Library
//!
//! This library provides a memory-bounded, crash-recoverable, concurrently
//! accessed set of 64-bit state fingerprints for state-space exploration.
//! Fingerprints that do not fit the configured memory budget overflow to
//! sorted pages on disk, and explicit two-phase checkpoints let a restarted
//! process resume from the last committed state.
//!
//! # Architecture
//!
//! The library is designed with the following principles in mind:
//! - A fixed memory budget, planned once at start-up
//! - Per-segment locking so concurrent workers rarely contend
//! - Synchronous error propagation; no fingerprint is ever silently dropped
//! - Checkpoints published by atomic directory rename

// Re-export public modules
pub mod config;
pub mod error;
pub mod fpset;
pub mod logging;

// Internal modules that are not part of the public API
#[cfg(test)]
pub(crate) mod tests;

pub use crate::config::{FpSetConfig, FpSetKind};
pub use crate::error::{FpSetError, FpSetResult};
pub use crate::fpset::{
    open_fp_set, open_fp_set_with_loader, DiskFpSet, Fingerprint, FpSet, FpSetStatistic, FpSetStats,
    MemFpSet,
};

/// Version information for the Mauka fingerprint set.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
