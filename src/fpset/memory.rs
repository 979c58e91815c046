// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Unbounded in-memory fingerprint set.
//!
//! This implementation uses DashSet, whose sharded locking lets concurrent
//! workers insert without a global lock. Nothing is ever evicted, so it is
//! only suitable when the state space is known to fit in memory. Checkpoints
//! use the same generation directories as [`DiskFpSet`](super::DiskFpSet),
//! written as a single segment file.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::info;

use crate::config::FpSetConfig;
use crate::error::FpSetResult;
use crate::fpset::checkpoint::CheckpointManager;
use crate::fpset::{restore, Fingerprint, FpSet, MinDistance};

/// Concurrent hash set of fingerprints with checkpoint support.
#[derive(Debug)]
pub struct MemFpSet {
    seed: u64,
    /// The underlying DashSet instance
    set: DashSet<Fingerprint>,
    /// Distinct fingerprints inserted; DashSet::len would lock every shard
    count: AtomicU64,
    checkpoints: Mutex<CheckpointManager>,
}

impl MemFpSet {
    /// Creates an empty set and restores the newest committed checkpoint
    /// named `filename` under `directory`, if any.
    pub fn init<P: AsRef<Path>>(
        config: &FpSetConfig,
        seed: u64,
        directory: P,
        filename: &str,
    ) -> FpSetResult<Self> {
        let checkpoints =
            CheckpointManager::open(directory.as_ref(), filename, config.storage.sync_writes)?;
        let recovered = checkpoints.recover()?;

        let set = Self {
            seed,
            set: DashSet::new(),
            count: AtomicU64::new(0),
            checkpoints: Mutex::new(checkpoints),
        };
        if let Some(checkpoint) = recovered {
            restore(&set, &checkpoint)?;
        }
        info!(restored = set.size(), "In-memory fingerprint set ready");
        Ok(set)
    }

    /// All fingerprints in ascending order.
    fn sorted(&self) -> Vec<Fingerprint> {
        let mut values: Vec<Fingerprint> = self.set.iter().map(|fp| *fp).collect();
        values.sort_unstable();
        values
    }
}

impl FpSet for MemFpSet {
    fn put(&self, fp: Fingerprint) -> FpSetResult<bool> {
        if self.set.insert(fp) {
            self.count.fetch_add(1, Ordering::Release);
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn contains(&self, fp: Fingerprint) -> FpSetResult<bool> {
        Ok(self.set.contains(&fp))
    }

    fn size(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn begin_chkpt(&self) -> FpSetResult<()> {
        let mut checkpoints = self.checkpoints.lock();
        let mut staging = checkpoints.begin(self.seed, 0)?;

        let mut writer = staging.segment_writer(0)?;
        for fp in self.sorted() {
            writer.push(fp)?;
        }
        let written = writer.finish()?;
        staging.record(0, &written);

        let generation = staging.generation();
        let count = checkpoints.stage(staging)?;
        info!(generation, count, "Checkpoint written");
        Ok(())
    }

    fn commit_chkpt(&self) -> FpSetResult<()> {
        self.checkpoints.lock().commit().map(|_| ())
    }

    fn check_fps(&self) -> FpSetResult<u64> {
        let mut distance = MinDistance::default();
        for fp in self.sorted() {
            distance.observe(fp);
        }
        Ok(distance.finish())
    }

    fn close(self: Box<Self>) -> FpSetResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> FpSetConfig {
        let mut config = FpSetConfig::default();
        config.storage.sync_writes = false;
        config
    }

    #[test]
    fn test_put_and_contains() {
        let dir = tempdir().unwrap();
        let set = MemFpSet::init(&config(), 0, dir.path(), "mem").unwrap();
        assert!(!set.put(0).unwrap());
        assert!(!set.put(u64::MAX).unwrap());
        assert!(set.put(0).unwrap());
        assert!(set.contains(u64::MAX).unwrap());
        assert!(!set.contains(1).unwrap());
        assert_eq!(set.size(), 2);
        assert!(set.statistics().is_none());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempdir().unwrap();
        let set = MemFpSet::init(&config(), 0, dir.path(), "mem").unwrap();
        for fp in [9u64, 3, 27, 1 << 40] {
            set.put(fp).unwrap();
        }
        set.begin_chkpt().unwrap();
        set.commit_chkpt().unwrap();
        drop(set);

        let restored = MemFpSet::init(&config(), 0, dir.path(), "mem").unwrap();
        assert_eq!(restored.size(), 4);
        assert!(restored.contains(27).unwrap());
        assert_eq!(restored.check_fps().unwrap(), 6);
    }
}
