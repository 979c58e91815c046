// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! One independently locked shard of the disk-backed fingerprint set.
//!
//! A segment owns a bucket table, a buffer of evicted fingerprints waiting to
//! be written, and a page store. A fingerprint lives in exactly one of those
//! three places. Every mutation happens under the segment's mutex; the
//! distinct-entry counter is an atomic so `size()` never takes the lock.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::config::StorageConfig;
use crate::error::{FpSetError, FpSetResult};
use crate::fpset::disk::{CompactionJob, DiskStore, MergeSource, SortedMerge, StoreSettings};
use crate::fpset::planner::MemoryPlan;
use crate::fpset::table::BucketTable;

#[derive(Debug)]
struct SegmentState {
    table: BucketTable,
    pending: HashSet<u64>,
    store: DiskStore,
    /// Snapshots or compaction jobs currently reading this segment's pages
    active_readers: usize,
    evictions: u64,
}

impl SegmentState {
    fn contains(&mut self, bucket: usize, fp: u64) -> FpSetResult<bool> {
        if self.table.contains(bucket, fp) || self.pending.contains(&fp) {
            return Ok(true);
        }
        self.store.probe(fp)
    }
}

/// Per-segment counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SegmentStats {
    pub in_memory: u64,
    pub pending: u64,
    pub on_disk: u64,
    pub pages: u64,
    pub evictions: u64,
    pub compactions: u64,
    pub index_bytes: u64,
    pub open_pages: u64,
    pub max_occupancy: u8,
}

/// An independently locked shard of the fingerprint space.
#[derive(Debug)]
pub(crate) struct Segment {
    index: usize,
    state: Mutex<SegmentState>,
    count: AtomicU64,
    pending_capacity: usize,
    max_pages: usize,
}

impl Segment {
    /// Allocates the segment's table and creates its overflow directory.
    pub fn new(
        index: usize,
        plan: &MemoryPlan,
        storage: &StorageConfig,
        overflow_root: &Path,
    ) -> FpSetResult<Self> {
        let open_handles = NonZeroUsize::new(storage.open_pages_per_segment(plan.segment_count()))
            .ok_or_else(|| {
                FpSetError::InvalidConfiguration("storage.max_open_pages must be at least 1".into())
            })?;
        let store = DiskStore::create(
            overflow_root.join(format!("seg-{index:04}")),
            StoreSettings {
                stride: storage.page_index_stride,
                sync: storage.sync_writes,
                index_entries: plan.index_entries_per_segment(),
                open_handles,
            },
        )?;
        let state = SegmentState {
            table: BucketTable::new(plan.buckets_per_segment, plan.bucket_entries),
            pending: HashSet::with_capacity(plan.pending_capacity + plan.bucket_entries),
            store,
            active_readers: 0,
            evictions: 0,
        };
        Ok(Self {
            index,
            state: Mutex::new(state),
            count: AtomicU64::new(0),
            pending_capacity: plan.pending_capacity,
            max_pages: storage.max_pages_per_segment,
        })
    }

    /// Position of this segment in the set.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Distinct fingerprints held by this segment.
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Inserts `fp`; returns whether it was already present.
    ///
    /// A put that fills the eviction buffer writes it as a page; if the
    /// segment then holds too many pages, a tiered merge runs after the lock
    /// is released.
    pub fn put(&self, bucket: usize, fp: u64) -> FpSetResult<bool> {
        let job = {
            let mut state = self.state.lock();
            if state.contains(bucket, fp)? {
                return Ok(true);
            }

            let SegmentState { table, pending, .. } = &mut *state;
            let evicted = table.insert(bucket, fp, pending);
            state.evictions += evicted as u64;
            self.count.fetch_add(1, Ordering::Release);

            if state.pending.len() < self.pending_capacity {
                return Ok(false);
            }
            self.flush_pending(&mut state)?
        };
        if let Some(job) = job {
            self.run_compaction(job)?;
        }
        Ok(false)
    }

    /// Whether `fp` is held in memory, in the eviction buffer or on disk.
    pub fn contains(&self, bucket: usize, fp: u64) -> FpSetResult<bool> {
        self.state.lock().contains(bucket, fp)
    }

    /// Writes the eviction buffer as one page. The buffer is only cleared once
    /// the page is on disk, so a failed write loses nothing.
    ///
    /// Returns a tiered merge to run once the lock is dropped, already
    /// registered as an active reader.
    fn flush_pending(&self, state: &mut SegmentState) -> FpSetResult<Option<CompactionJob>> {
        let mut batch: Vec<u64> = state.pending.iter().copied().collect();
        batch.sort_unstable();
        state.store.append(&batch)?;
        state.pending.clear();

        if state.active_readers > 0 {
            return Ok(None);
        }
        let job = state.store.tiered_compaction_job(self.max_pages)?;
        if job.is_some() {
            state.active_readers += 1;
        }
        Ok(job)
    }

    /// Runs a job registered as an active reader and installs its output.
    fn run_compaction(&self, job: CompactionJob) -> FpSetResult<()> {
        let result = job.run();
        let mut state = self.state.lock();
        state.active_readers -= 1;
        state.store.install(result?)
    }

    /// Merges all overflow pages into one, doing the disk work outside the lock.
    pub fn compact(&self) -> FpSetResult<()> {
        let job = {
            let mut state = self.state.lock();
            if state.active_readers > 0 {
                return Ok(());
            }
            match state.store.compaction_job()? {
                Some(job) => {
                    state.active_readers += 1;
                    job
                }
                None => return Ok(()),
            }
        };
        self.run_compaction(job)
    }

    /// Sorted, deduplicated view of everything the segment holds right now.
    ///
    /// Only the in-memory copy is taken under the lock; pages are streamed
    /// afterwards. Threshold compaction is held off until the snapshot drops.
    pub fn snapshot(&self) -> FpSetResult<SegmentSnapshot<'_>> {
        let (mut memory, readers) = {
            let mut state = self.state.lock();
            let readers = state.store.open_readers()?;
            let memory: Vec<u64> = state
                .table
                .iter()
                .chain(state.pending.iter().copied())
                .collect();
            state.active_readers += 1;
            (memory, readers)
        };
        memory.sort_unstable();

        let mut sources = Vec::with_capacity(readers.len() + 1);
        sources.push(MergeSource::Memory(memory.into_iter()));
        sources.extend(readers.into_iter().map(MergeSource::File));
        Ok(SegmentSnapshot {
            merge: SortedMerge::new(sources),
            segment: self,
        })
    }

    /// Current counters.
    pub fn stats(&self) -> SegmentStats {
        let state = self.state.lock();
        SegmentStats {
            in_memory: state.table.len() as u64,
            pending: state.pending.len() as u64,
            on_disk: state.store.entry_count(),
            pages: state.store.page_count() as u64,
            evictions: state.evictions,
            compactions: state.store.compactions(),
            index_bytes: (state.store.index_entries() * std::mem::size_of::<u64>()) as u64,
            open_pages: state.store.open_handles() as u64,
            max_occupancy: state.table.max_occupancy(),
        }
    }
}

/// Iterator over a segment's contents in ascending order.
pub(crate) struct SegmentSnapshot<'a> {
    merge: SortedMerge,
    segment: &'a Segment,
}

impl Iterator for SegmentSnapshot<'_> {
    type Item = FpSetResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next()
    }
}

impl Drop for SegmentSnapshot<'_> {
    fn drop(&mut self) {
        self.segment.state.lock().active_readers -= 1;
    }
}
