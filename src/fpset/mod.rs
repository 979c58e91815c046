// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Fingerprint sets.
//!
//! A fingerprint set answers "has this 64-bit state hash been seen before?"
//! for many concurrent exploration workers and survives process restarts
//! through explicit checkpoints.
//!
//! Two implementations share the [`FpSet`] contract:
//!
//! - [`DiskFpSet`] keeps a fixed-size, segmented table inside a memory budget
//!   and moves evicted fingerprints to sorted pages on disk.
//! - [`MemFpSet`] is an unbounded concurrent hash set for runs known to fit
//!   in memory.
//!
//! ```no_run
//! use mauka_fpset_lib::config::FpSetConfig;
//! use mauka_fpset_lib::fpset::open_fp_set;
//!
//! # fn main() -> mauka_fpset_lib::error::FpSetResult<()> {
//! let set = open_fp_set(&FpSetConfig::default(), 15041980, "/var/tmp/run", "states")?;
//! assert!(!set.put(42)?);
//! assert!(set.put(42)?);
//! set.begin_chkpt()?;
//! set.commit_chkpt()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::Serialize;

use crate::config::{ConfigLoader, FpSetConfig, FpSetKind};
use crate::error::{FpSetError, FpSetResult};

pub(crate) mod checkpoint;
mod disk;
mod disk_fpset;
mod format;
pub mod hash;
mod memory;
pub mod planner;
mod segment;
mod table;

pub use checkpoint::{Manifest, SegmentEntry, MANIFEST_FILE};
pub use disk_fpset::DiskFpSet;
pub use memory::MemFpSet;
pub use planner::MemoryPlan;

use checkpoint::Checkpoint;

/// A 64-bit state fingerprint.
pub type Fingerprint = u64;

/// Operations shared by every fingerprint set.
pub trait FpSet: Send + Sync {
    /// Inserts `fp`. Returns `true` if it was already present.
    fn put(&self, fp: Fingerprint) -> FpSetResult<bool>;

    /// Whether `fp` has been inserted.
    fn contains(&self, fp: Fingerprint) -> FpSetResult<bool>;

    /// Number of distinct fingerprints held.
    fn size(&self) -> u64;

    /// Writes the current contents to a new, uncommitted checkpoint generation.
    fn begin_chkpt(&self) -> FpSetResult<()>;

    /// Publishes the generation written by [`begin_chkpt`](Self::begin_chkpt)
    /// and removes older ones.
    fn commit_chkpt(&self) -> FpSetResult<()>;

    /// Smallest distance between any two stored fingerprints, or `u64::MAX`
    /// when fewer than two are stored.
    fn check_fps(&self) -> FpSetResult<u64>;

    /// Diagnostics, for implementations that collect them.
    fn statistics(&self) -> Option<&dyn FpSetStatistic> {
        None
    }

    /// Releases working storage. Committed checkpoints stay on disk.
    fn close(self: Box<Self>) -> FpSetResult<()>;
}

/// Optional diagnostics capability of a fingerprint set.
pub trait FpSetStatistic {
    /// Highest in-memory bucket occupancy observed so far.
    fn max_tbl_cnt(&self) -> u64;

    /// Snapshot of the set's counters.
    fn stats(&self) -> FpSetStats;
}

/// Counters describing where a set's fingerprints live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FpSetStats {
    /// Distinct fingerprints
    pub size: u64,
    /// Fingerprints held in in-memory buckets
    pub in_memory: u64,
    /// Evicted fingerprints waiting to be written to a page
    pub pending: u64,
    /// Fingerprints in overflow pages
    pub on_disk: u64,
    /// Overflow pages across all segments
    pub pages: u64,
    /// Fingerprints moved out of in-memory buckets
    pub evictions: u64,
    /// Page compactions performed
    pub compactions: u64,
    /// Memory held by the overflow page indexes
    pub index_bytes: u64,
    /// Overflow page files currently held open
    pub open_pages: u64,
    /// Highest in-memory bucket occupancy observed
    pub max_tbl_cnt: u64,
    /// Optimistic probability that two stored states share a fingerprint
    pub collision_probability: f64,
}

/// Birthday-bound estimate `n(n-1) / 2^65` of at least one fingerprint
/// collision among `n` distinct states.
pub fn collision_probability(n: u64) -> f64 {
    let n = n as f64;
    n * (n - 1.0) / 2f64.powi(65)
}

/// Builds the fingerprint set selected by `config.kind`, recovering the most
/// recent committed checkpoint named `filename` under `directory`.
///
/// # Errors
///
/// * [`FpSetError::InvalidConfiguration`] for an unusable budget, directory or name
/// * [`FpSetError::CorruptCheckpoint`] if checkpoints exist but none can be loaded
/// * [`FpSetError::StorageIo`] if the working directories cannot be prepared
pub fn open_fp_set<P: AsRef<Path>>(
    config: &FpSetConfig,
    seed: u64,
    directory: P,
    filename: &str,
) -> FpSetResult<Box<dyn FpSet>> {
    let set: Box<dyn FpSet> = match config.kind {
        FpSetKind::Memory => Box::new(MemFpSet::init(config, seed, directory, filename)?),
        FpSetKind::Disk => Box::new(DiskFpSet::init(config, seed, directory, filename)?),
    };
    Ok(set)
}

/// Loads the configuration through `loader`, then opens the set as
/// [`open_fp_set`] does.
///
/// # Errors
///
/// [`FpSetError::Config`] if the configuration cannot be loaded or validated,
/// otherwise the errors of [`open_fp_set`].
pub fn open_fp_set_with_loader<P: AsRef<Path>>(
    loader: &ConfigLoader,
    seed: u64,
    directory: P,
    filename: &str,
) -> FpSetResult<Box<dyn FpSet>> {
    let config = loader.load()?;
    open_fp_set(&config, seed, directory, filename)
}

/// Re-inserts the contents of a checkpoint into an empty set.
fn restore(set: &dyn FpSet, checkpoint: &Checkpoint) -> FpSetResult<()> {
    for fp in checkpoint.fingerprints()? {
        set.put(fp?)?;
    }
    if set.size() != checkpoint.count() {
        return Err(FpSetError::corrupt(
            checkpoint.dir().join(MANIFEST_FILE),
            format!(
                "restored {} distinct fingerprints, checkpoint {} records {}",
                set.size(),
                checkpoint.manifest().generation,
                checkpoint.count()
            ),
        ));
    }
    Ok(())
}

/// Tracks the smallest gap between consecutive values of an ascending stream.
#[derive(Debug, Default)]
struct MinDistance {
    last: Option<u64>,
    min: Option<u64>,
}

impl MinDistance {
    fn observe(&mut self, fp: u64) {
        if let Some(last) = self.last {
            let gap = fp - last;
            self.min = Some(self.min.map_or(gap, |min| min.min(gap)));
        }
        self.last = Some(fp);
    }

    fn finish(self) -> u64 {
        self.min.unwrap_or(u64::MAX)
    }
}
