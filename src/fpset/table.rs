// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Fixed-capacity bucketed table backing one segment.
//!
//! Buckets are contiguous runs of `bucket_entries` slots in a single flat
//! vector. Entries inside a bucket are kept in insertion order, so the front
//! of a bucket is always its oldest entries. The table never grows: a full
//! bucket hands its oldest half to the caller for eviction.

/// Bucketed open-addressing table of fingerprints.
#[derive(Debug)]
pub(crate) struct BucketTable {
    slots: Vec<u64>,
    occupancy: Vec<u8>,
    bucket_entries: usize,
    len: usize,
    max_occupancy: u8,
}

impl BucketTable {
    /// Allocates `buckets * bucket_entries` slots up front.
    pub fn new(buckets: usize, bucket_entries: usize) -> Self {
        debug_assert!(bucket_entries > 0 && bucket_entries <= u8::MAX as usize);
        Self {
            slots: vec![0; buckets * bucket_entries],
            occupancy: vec![0; buckets],
            bucket_entries,
            len: 0,
            max_occupancy: 0,
        }
    }

    fn bucket(&self, bucket: usize) -> &[u64] {
        let start = bucket * self.bucket_entries;
        &self.slots[start..start + self.occupancy[bucket] as usize]
    }

    /// Whether `fp` is stored in `bucket`.
    #[inline]
    pub fn contains(&self, bucket: usize, fp: u64) -> bool {
        self.bucket(bucket).contains(&fp)
    }

    /// Inserts `fp`, which must not already be in the table.
    ///
    /// If the bucket is full its oldest half is moved into `evicted` first.
    /// Returns the number of fingerprints evicted.
    pub fn insert<E: Extend<u64>>(&mut self, bucket: usize, fp: u64, evicted: &mut E) -> usize {
        let start = bucket * self.bucket_entries;
        let mut occupied = self.occupancy[bucket] as usize;
        let mut moved = 0;

        if occupied == self.bucket_entries {
            moved = (self.bucket_entries + 1) / 2;
            evicted.extend(self.slots[start..start + moved].iter().copied());
            self.slots
                .copy_within(start + moved..start + occupied, start);
            occupied -= moved;
            self.len -= moved;
        }

        self.slots[start + occupied] = fp;
        occupied += 1;
        self.occupancy[bucket] = occupied as u8;
        self.len += 1;
        self.max_occupancy = self.max_occupancy.max(occupied as u8);
        moved
    }

    /// Fingerprints currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Highest bucket occupancy ever observed.
    pub fn max_occupancy(&self) -> u8 {
        self.max_occupancy
    }

    /// Iterates over every stored fingerprint, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.occupancy.len()).flat_map(move |b| self.bucket(b).iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut table = BucketTable::new(4, 4);
        let mut evicted = Vec::new();

        assert_eq!(table.insert(1, 10, &mut evicted), 0);
        assert_eq!(table.insert(1, 11, &mut evicted), 0);
        assert!(table.contains(1, 10));
        assert!(table.contains(1, 11));
        assert!(!table.contains(0, 10));
        assert_eq!(table.len(), 2);
        assert!(evicted.is_empty());
    }

    #[test]
    fn test_full_bucket_evicts_oldest_half() {
        let mut table = BucketTable::new(2, 4);
        let mut evicted = Vec::new();
        for fp in 1..=4 {
            table.insert(0, fp, &mut evicted);
        }
        assert_eq!(table.max_occupancy(), 4);

        assert_eq!(table.insert(0, 5, &mut evicted), 2);
        assert_eq!(evicted, vec![1, 2]);
        for fp in 3..=5 {
            assert!(table.contains(0, fp));
        }
        assert!(!table.contains(0, 1));
        assert_eq!(table.len(), 3);
        assert_eq!(table.max_occupancy(), 4);
    }

    #[test]
    fn test_single_entry_buckets() {
        let mut table = BucketTable::new(1, 1);
        let mut evicted = Vec::new();
        table.insert(0, 7, &mut evicted);
        assert_eq!(table.insert(0, 8, &mut evicted), 1);
        assert_eq!(evicted, vec![7]);
        assert!(table.contains(0, 8));
    }

    #[test]
    fn test_iter_visits_everything() {
        let mut table = BucketTable::new(8, 2);
        let mut evicted = Vec::new();
        for fp in 0..16u64 {
            table.insert((fp % 8) as usize, fp, &mut evicted);
        }
        let mut all: Vec<u64> = table.iter().collect();
        all.sort_unstable();
        assert_eq!(all, (0..16).collect::<Vec<_>>());
    }
}
