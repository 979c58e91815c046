// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Memory budget planner.
//!
//! Turns a byte budget into table geometry: how many segments, how many
//! buckets per segment, how many entries per bucket and how large each
//! segment's eviction buffer may grow. A slice of the budget is reserved for
//! checkpoint buffers (one segment is copied out at a time) and the in-memory
//! page index of the overflow store.

use serde::Serialize;

use crate::config::{MemoryConfig, Validate};
use crate::error::{FpSetError, FpSetResult};

/// Bytes per stored fingerprint.
pub const FINGERPRINT_BYTES: u64 = 8;

/// Bytes of bookkeeping per bucket (its occupancy counter).
pub const BUCKET_OCCUPANCY_BYTES: u64 = 1;

/// Conservative cost of one entry in a segment's eviction buffer.
pub const PENDING_ENTRY_BYTES: u64 = 16;

/// A segment gives this fraction (1/n) of its share to the eviction buffer.
const PENDING_SHARE_DIVISOR: u64 = 8;

/// Page index entries every segment is guaranteed, whatever the budget.
pub const MIN_INDEX_ENTRIES: u64 = 16;

/// Table geometry derived from a [`MemoryConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryPlan {
    /// Budget the plan was computed for
    pub budget_bytes: u64,
    /// `2^segment_bits` segments
    pub segment_bits: u32,
    /// Buckets in each segment (a power of two)
    pub buckets_per_segment: usize,
    /// Fingerprints per bucket
    pub bucket_entries: usize,
    /// Evicted fingerprints a segment buffers before writing a page
    pub pending_capacity: usize,
    /// Bytes held back for checkpoint buffers and the page index
    pub reserve_bytes: u64,
    /// Part of the reserve the overflow page indexes may occupy
    pub index_bytes: u64,
}

impl MemoryPlan {
    /// Computes the plan for the given configuration.
    ///
    /// The result depends only on the configuration, so the same budget always
    /// yields the same geometry.
    ///
    /// # Errors
    ///
    /// Returns [`FpSetError::InvalidConfiguration`] if the configuration is
    /// invalid or the budget cannot hold at least one bucket per segment.
    pub fn compute(config: &MemoryConfig) -> FpSetResult<Self> {
        config
            .validate()
            .map_err(|e| FpSetError::InvalidConfiguration(e.to_string()))?;

        let segments = config.segment_count() as u64;
        let bucket_entries = config.bucket_entries as u64;
        let reserve_bytes = (config.budget_bytes as f64 * config.reserve_ratio).ceil() as u64;
        let usable = config.budget_bytes.saturating_sub(reserve_bytes);
        let per_segment = usable / segments;
        let pending_bytes = per_segment / PENDING_SHARE_DIVISOR;
        let bucket_bytes = bucket_entries * FINGERPRINT_BYTES + BUCKET_OCCUPANCY_BYTES;
        let fit = per_segment.saturating_sub(pending_bytes) / bucket_bytes;

        if fit == 0 || pending_bytes < PENDING_ENTRY_BYTES {
            return Err(FpSetError::InvalidConfiguration(format!(
                "memory budget of {} bytes cannot hold one {}-entry bucket in each of {} segments",
                config.budget_bytes, config.bucket_entries, segments
            )));
        }

        let pending_capacity = (pending_bytes / PENDING_ENTRY_BYTES) as usize;
        let mut plan = Self {
            budget_bytes: config.budget_bytes,
            segment_bits: config.segment_bits,
            buckets_per_segment: prev_power_of_two(fit) as usize,
            bucket_entries: config.bucket_entries,
            pending_capacity,
            reserve_bytes,
            index_bytes: 0,
        };

        // One segment is copied out at a time while checkpointing; the page
        // indexes get what is left of the reserve.
        let min_index_bytes = segments * MIN_INDEX_ENTRIES * FINGERPRINT_BYTES;
        while plan.snapshot_bytes() + min_index_bytes > reserve_bytes
            && plan.buckets_per_segment > 1
        {
            plan.buckets_per_segment /= 2;
        }
        if plan.snapshot_bytes() + min_index_bytes > reserve_bytes {
            return Err(FpSetError::InvalidConfiguration(format!(
                "reserve of {reserve_bytes} bytes cannot buffer a single segment snapshot \
                 plus {min_index_bytes} bytes of page index"
            )));
        }
        plan.index_bytes = reserve_bytes - plan.snapshot_bytes();

        Ok(plan)
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        1usize << self.segment_bits
    }

    /// Fingerprints one segment's table holds.
    pub fn segment_capacity(&self) -> usize {
        self.buckets_per_segment * self.bucket_entries
    }

    /// Fingerprints the whole in-memory table holds.
    pub fn capacity(&self) -> u64 {
        self.segment_count() as u64 * self.segment_capacity() as u64
    }

    /// Bytes of bucket storage across all segments.
    pub fn table_bytes(&self) -> u64 {
        let bucket_bytes = self.bucket_entries as u64 * FINGERPRINT_BYTES + BUCKET_OCCUPANCY_BYTES;
        self.segment_count() as u64 * self.buckets_per_segment as u64 * bucket_bytes
    }

    /// Bytes of eviction buffers across all segments.
    pub fn pending_bytes(&self) -> u64 {
        self.segment_count() as u64 * self.pending_capacity as u64 * PENDING_ENTRY_BYTES
    }

    /// Bytes needed to copy one segment out during a checkpoint.
    pub fn snapshot_bytes(&self) -> u64 {
        (self.segment_capacity() + self.pending_capacity) as u64 * FINGERPRINT_BYTES
    }

    /// Page index entries one segment may keep in memory.
    pub fn index_entries_per_segment(&self) -> usize {
        (self.index_bytes / FINGERPRINT_BYTES / self.segment_count() as u64) as usize
    }

    /// Statically allocated bytes (table plus eviction buffers).
    pub fn static_bytes(&self) -> u64 {
        self.table_bytes() + self.pending_bytes()
    }
}

fn prev_power_of_two(n: u64) -> u64 {
    debug_assert!(n > 0);
    1 << (63 - n.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(budget_bytes: u64, segment_bits: u32) -> MemoryConfig {
        MemoryConfig {
            budget_bytes,
            segment_bits,
            bucket_entries: 8,
            reserve_ratio: 0.25,
        }
    }

    #[test]
    fn test_plan_fits_budget() {
        for budget in [64 * 1024, 1 << 20, 3 * (1 << 20) + 17, 1 << 30] {
            for bits in [0, 2, 4] {
                let plan = MemoryPlan::compute(&config(budget, bits)).unwrap();
                assert!(
                    plan.static_bytes() + plan.snapshot_bytes() + plan.index_bytes <= budget,
                    "plan {plan:?} exceeds budget {budget}"
                );
                assert!(plan.index_entries_per_segment() as u64 >= MIN_INDEX_ENTRIES);
                assert!(plan.buckets_per_segment.is_power_of_two());
                assert_eq!(plan.segment_count(), 1 << bits);
            }
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = MemoryPlan::compute(&config(10_000_000, 3)).unwrap();
        let b = MemoryPlan::compute(&config(10_000_000, 3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_larger_budget_never_shrinks_capacity() {
        let small = MemoryPlan::compute(&config(1 << 20, 2)).unwrap();
        let large = MemoryPlan::compute(&config(1 << 24, 2)).unwrap();
        assert!(large.capacity() >= small.capacity());
    }

    #[test]
    fn test_budget_too_small() {
        let result = MemoryPlan::compute(&config(1024, 4));
        assert!(matches!(result, Err(FpSetError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_invalid_geometry_is_rejected() {
        let mut cfg = config(1 << 20, 2);
        cfg.bucket_entries = 0;
        assert!(matches!(
            MemoryPlan::compute(&cfg),
            Err(FpSetError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_index_budget_is_carved_from_reserve() {
        for bits in [0, 3, 6] {
            let plan = MemoryPlan::compute(&config(64 << 20, bits)).unwrap();
            assert_eq!(plan.index_bytes + plan.snapshot_bytes(), plan.reserve_bytes);
            assert!(
                plan.index_entries_per_segment() as u64 * FINGERPRINT_BYTES
                    * plan.segment_count() as u64
                    <= plan.index_bytes
            );
        }
    }

    #[test]
    fn test_prev_power_of_two() {
        assert_eq!(prev_power_of_two(1), 1);
        assert_eq!(prev_power_of_two(5), 4);
        assert_eq!(prev_power_of_two(64), 64);
    }
}
