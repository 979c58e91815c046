// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Fingerprint routing.
//!
//! The high-order bits of a fingerprint select its segment, so segments cover
//! contiguous, ordered ranges of the fingerprint space. Inside a segment a
//! seeded FNV-1a mix selects the bucket; the mix keeps structured inputs
//! (sequential integers, for instance) from piling into a few buckets.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Standard FNV-1a 64-bit offset basis.
#[allow(clippy::unreadable_literal)]
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// Mixes a fingerprint with a seed.
///
/// A seed of zero gives plain FNV-1a over the little-endian bytes. The result
/// is xor-folded so the low bits used for bucket selection depend on every
/// input byte.
#[inline]
pub fn mix(fp: u64, seed: u64) -> u64 {
    let mut hasher = FnvHasher::with_key(FNV_OFFSET_BASIS ^ seed);
    hasher.write(&fp.to_le_bytes());
    let hash = hasher.finish();
    hash ^ (hash >> 32)
}

/// Maps fingerprints to a segment and to a bucket within that segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FingerprintRouter {
    seed: u64,
    segment_bits: u32,
    bucket_mask: u64,
}

impl FingerprintRouter {
    /// Creates a router for `2^segment_bits` segments of `buckets_per_segment`
    /// buckets each. `buckets_per_segment` must be a power of two.
    pub fn new(seed: u64, segment_bits: u32, buckets_per_segment: usize) -> Self {
        debug_assert!(buckets_per_segment.is_power_of_two());
        Self {
            seed,
            segment_bits,
            bucket_mask: buckets_per_segment as u64 - 1,
        }
    }

    /// Index of the segment owning `fp`.
    #[inline]
    pub fn segment(&self, fp: u64) -> usize {
        if self.segment_bits == 0 {
            0
        } else {
            (fp >> (64 - self.segment_bits)) as usize
        }
    }

    /// Index of the bucket for `fp` inside its segment.
    #[inline]
    pub fn bucket(&self, fp: u64) -> usize {
        (mix(fp, self.seed) & self.bucket_mask) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_follow_high_bits() {
        let router = FingerprintRouter::new(1, 3, 16);
        assert_eq!(router.segment(0), 0);
        assert_eq!(router.segment(u64::MAX), 7);
        assert_eq!(router.segment(1 << 61), 1);
        assert_eq!(router.segment((1 << 63) | 5), 4);
    }

    #[test]
    fn test_single_segment() {
        let router = FingerprintRouter::new(1, 0, 16);
        assert_eq!(router.segment(u64::MAX), 0);
        assert_eq!(router.segment(0), 0);
    }

    #[test]
    fn test_bucket_in_range_and_spread() {
        let router = FingerprintRouter::new(7, 0, 64);
        let mut seen = [0usize; 64];
        for fp in 0..6_400u64 {
            let bucket = router.bucket(fp);
            assert!(bucket < 64);
            seen[bucket] += 1;
        }
        // Sequential input must still reach every bucket.
        assert!(seen.iter().all(|&n| n > 0));
    }

    #[test]
    fn test_seed_changes_mix() {
        assert_ne!(mix(42, 1), mix(42, 2));
        assert_eq!(mix(42, 1), mix(42, 1));
    }
}
