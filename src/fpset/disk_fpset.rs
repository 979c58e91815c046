// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Memory-bounded fingerprint set with disk overflow.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{FpSetConfig, Validate};
use crate::error::{FpSetError, FpSetResult, IoResultExt};
use crate::fpset::checkpoint::CheckpointManager;
use crate::fpset::hash::FingerprintRouter;
use crate::fpset::planner::MemoryPlan;
use crate::fpset::segment::{Segment, SegmentStats};
use crate::fpset::{
    collision_probability, restore, Fingerprint, FpSet, FpSetStatistic, FpSetStats, MinDistance,
};

/// Fingerprint set that keeps a fixed-size table in memory and moves evicted
/// fingerprints to sorted pages under `<directory>/<filename>.overflow`.
///
/// The table is split into `2^segment_bits` segments by the high bits of each
/// fingerprint; each segment has its own lock, so workers touching different
/// segments never wait on each other.
#[derive(Debug)]
pub struct DiskFpSet {
    seed: u64,
    plan: MemoryPlan,
    router: FingerprintRouter,
    segments: Vec<Segment>,
    checkpoints: Mutex<CheckpointManager>,
    overflow_dir: PathBuf,
}

impl DiskFpSet {
    /// Plans the table for `config.memory`, prepares the working directories
    /// and restores the newest committed checkpoint, if any.
    ///
    /// Overflow pages left behind by an earlier process are discarded; only
    /// committed checkpoints carry state across restarts.
    pub fn init<P: AsRef<Path>>(
        config: &FpSetConfig,
        seed: u64,
        directory: P,
        filename: &str,
    ) -> FpSetResult<Self> {
        config
            .storage
            .validate()
            .map_err(|e| FpSetError::InvalidConfiguration(e.to_string()))?;
        let plan = MemoryPlan::compute(&config.memory)?;
        let directory = directory.as_ref();
        let checkpoints =
            CheckpointManager::open(directory, filename, config.storage.sync_writes)?;

        let overflow_dir = directory.join(format!("{filename}.overflow"));
        if overflow_dir.exists() {
            fs::remove_dir_all(&overflow_dir)
                .storage_context(|| format!("clearing {}", overflow_dir.display()))?;
        }
        fs::create_dir_all(&overflow_dir)
            .storage_context(|| format!("creating {}", overflow_dir.display()))?;

        let segments = (0..plan.segment_count())
            .map(|index| Segment::new(index, &plan, &config.storage, &overflow_dir))
            .collect::<FpSetResult<Vec<_>>>()?;
        let recovered = checkpoints.recover()?;

        let set = Self {
            seed,
            plan,
            router: FingerprintRouter::new(seed, plan.segment_bits, plan.buckets_per_segment),
            segments,
            checkpoints: Mutex::new(checkpoints),
            overflow_dir,
        };
        if let Some(checkpoint) = recovered {
            restore(&set, &checkpoint)?;
        }

        info!(
            budget_bytes = plan.budget_bytes,
            segments = plan.segment_count(),
            buckets_per_segment = plan.buckets_per_segment,
            bucket_entries = plan.bucket_entries,
            capacity = plan.capacity(),
            restored = set.size(),
            "Disk fingerprint set ready"
        );
        Ok(set)
    }

    /// Table geometry in use.
    pub fn plan(&self) -> &MemoryPlan {
        &self.plan
    }

    /// Seed the set was initialised with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Directory holding the overflow pages.
    pub fn overflow_dir(&self) -> &Path {
        &self.overflow_dir
    }

    #[inline]
    fn segment_for(&self, fp: Fingerprint) -> (&Segment, usize) {
        (
            &self.segments[self.router.segment(fp)],
            self.router.bucket(fp),
        )
    }

    /// Releases the table and deletes the overflow pages.
    pub fn close(self) -> FpSetResult<()> {
        if self.checkpoints.lock().is_staged() {
            warn!("Closing with a staged checkpoint that was never committed");
        }
        let Self {
            segments,
            overflow_dir,
            ..
        } = self;
        drop(segments);
        fs::remove_dir_all(&overflow_dir)
            .storage_context(|| format!("removing {}", overflow_dir.display()))
    }
}

impl FpSet for DiskFpSet {
    fn put(&self, fp: Fingerprint) -> FpSetResult<bool> {
        let (segment, bucket) = self.segment_for(fp);
        segment.put(bucket, fp)
    }

    fn contains(&self, fp: Fingerprint) -> FpSetResult<bool> {
        let (segment, bucket) = self.segment_for(fp);
        segment.contains(bucket, fp)
    }

    fn size(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    fn begin_chkpt(&self) -> FpSetResult<()> {
        let mut checkpoints = self.checkpoints.lock();
        let mut staging = checkpoints.begin(self.seed, self.plan.segment_bits)?;

        for segment in &self.segments {
            segment.compact()?;
            let mut writer = staging.segment_writer(segment.index())?;
            for fp in segment.snapshot()? {
                writer.push(fp?)?;
            }
            let written = writer.finish()?;
            staging.record(segment.index(), &written);
        }

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
        for segment in &self.segments {
            for fp in segment.snapshot()? {
                distance.observe(fp?);
            }
        }
        Ok(distance.finish())
    }

    fn statistics(&self) -> Option<&dyn FpSetStatistic> {
        Some(self)
    }

    fn close(self: Box<Self>) -> FpSetResult<()> {
        DiskFpSet::close(*self)
    }
}

impl FpSetStatistic for DiskFpSet {
    fn max_tbl_cnt(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.stats().max_occupancy as u64)
            .max()
            .unwrap_or(0)
    }

    fn stats(&self) -> FpSetStats {
        let totals = self.segments.iter().map(Segment::stats).fold(
            SegmentStats::default(),
            |mut acc, s| {
                acc.in_memory += s.in_memory;
                acc.pending += s.pending;
                acc.on_disk += s.on_disk;
                acc.pages += s.pages;
                acc.evictions += s.evictions;
                acc.compactions += s.compactions;
                acc.index_bytes += s.index_bytes;
                acc.open_pages += s.open_pages;
                acc.max_occupancy = acc.max_occupancy.max(s.max_occupancy);
                acc
            },
        );
        let size = self.size();
        FpSetStats {
            size,
            in_memory: totals.in_memory,
            pending: totals.pending,
            on_disk: totals.on_disk,
            pages: totals.pages,
            evictions: totals.evictions,
            compactions: totals.compactions,
            index_bytes: totals.index_bytes,
            open_pages: totals.open_pages,
            max_tbl_cnt: totals.max_occupancy as u64,
            collision_probability: collision_probability(size),
        }
    }
}
