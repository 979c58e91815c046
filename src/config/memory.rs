//! Memory budget configuration module.
//!
//! This module defines how much memory the fingerprint set may use and how the
//! in-memory table is shaped inside that budget.

use super::{ConfigResult, Validate};
use crate::error::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Largest supported segment count exponent (4096 segments).
pub const MAX_SEGMENT_BITS: u32 = 12;

/// Largest supported bucket width; occupancy is tracked in a byte.
pub const MAX_BUCKET_ENTRIES: usize = u8::MAX as usize;

/// Memory budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total bytes the fingerprint set may hold resident
    pub budget_bytes: u64,

    /// The table is split into `2^segment_bits` independently locked segments
    pub segment_bits: u32,

    /// Fingerprints per in-memory bucket
    pub bucket_entries: usize,

    /// Share of the budget held back for checkpoint buffers and the disk index
    pub reserve_ratio: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 64 * 1024 * 1024, // 64 MiB
            segment_bits: default_segment_bits(),
            bucket_entries: 8,
            reserve_ratio: 0.25,
        }
    }
}

impl MemoryConfig {
    /// Creates a configuration with the given budget and default geometry.
    pub fn with_budget(budget_bytes: u64) -> Self {
        Self {
            budget_bytes,
            ..Self::default()
        }
    }

    /// Number of segments described by `segment_bits`.
    pub fn segment_count(&self) -> usize {
        1usize << self.segment_bits
    }
}

/// Four segments per core keeps lock contention low without fragmenting the budget.
fn default_segment_bits() -> u32 {
    let wanted = (num_cpus::get() * 4).next_power_of_two();
    wanted.trailing_zeros().min(MAX_SEGMENT_BITS)
}

impl Validate for MemoryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.budget_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "budget_bytes must be greater than 0".to_string(),
            ));
        }

        if self.segment_bits > MAX_SEGMENT_BITS {
            return Err(ConfigError::ValueOutOfRange {
                key: "memory.segment_bits".to_string(),
                message: format!("must be at most {MAX_SEGMENT_BITS}"),
            });
        }

        if self.bucket_entries == 0 || self.bucket_entries > MAX_BUCKET_ENTRIES {
            return Err(ConfigError::ValueOutOfRange {
                key: "memory.bucket_entries".to_string(),
                message: format!("must be between 1 and {MAX_BUCKET_ENTRIES}"),
            });
        }

        if !(self.reserve_ratio > 0.0 && self.reserve_ratio <= 0.9) {
            return Err(ConfigError::ValueOutOfRange {
                key: "memory.reserve_ratio".to_string(),
                message: "must be in (0.0, 0.9]".to_string(),
            });
        }

        Ok(())
    }
}
