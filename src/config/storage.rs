//! Storage configuration module.
//!
//! Settings for the disk overflow pages and the checkpoint files.

use super::{ConfigResult, Validate};
use crate::error::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Every `page_index_stride`-th fingerprint of a page is kept in memory as a probe index
    pub page_index_stride: usize,

    /// A segment compacts its pages once it holds more than this many
    pub max_pages_per_segment: usize,

    /// Open overflow page files kept across the whole set, shared evenly by segments
    pub max_open_pages: usize,

    /// Whether page, checkpoint and directory writes are fsynced
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_index_stride: 512,
            max_pages_per_segment: 16,
            max_open_pages: 256,
            sync_writes: true,
        }
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.page_index_stride == 0 {
            return Err(ConfigError::ValidationError(
                "page_index_stride must be greater than 0".to_string(),
            ));
        }

        if self.max_pages_per_segment < 2 {
            return Err(ConfigError::ValueOutOfRange {
                key: "storage.max_pages_per_segment".to_string(),
                message: "must be at least 2".to_string(),
            });
        }

        if self.max_open_pages == 0 {
            return Err(ConfigError::ValueOutOfRange {
                key: "storage.max_open_pages".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

impl StorageConfig {
    /// Page files one of `segments` segments may keep open at a time.
    pub fn open_pages_per_segment(&self, segments: usize) -> usize {
        (self.max_open_pages / segments.max(1)).max(1)
    }
}
