//! Cross-component tests for the fingerprint sets.
//!
//! These tests reach into crate-private pieces (the checkpoint manager, the
//! router) that the integration tests under `tests/` cannot see.

use std::collections::HashSet;

use proptest::prelude::*;

use crate::config::{ConfigLoader, FpSetKind};
use crate::error::config::ConfigError;
use crate::error::FpSetError;
use crate::fpset::checkpoint::CheckpointManager;
use crate::fpset::{open_fp_set, open_fp_set_with_loader, DiskFpSet, FpSet};
use crate::tests::{fingerprint_strategy, small_config, TestFixture};

fn check_against_model(kind: FpSetKind, batch: &[u64]) -> Result<(), TestCaseError> {
    let fixture = TestFixture::new().unwrap();
    let set = open_fp_set(&small_config(kind), 3, fixture.path(), "model").unwrap();
    let mut model = HashSet::new();

    for &fp in batch {
        let seen = set.put(fp).unwrap();
        prop_assert_eq!(seen, !model.insert(fp));
        prop_assert!(set.contains(fp).unwrap());
    }
    prop_assert_eq!(set.size(), model.len() as u64);

    set.begin_chkpt().unwrap();
    set.commit_chkpt().unwrap();
    drop(set);

    let restored = open_fp_set(&small_config(kind), 3, fixture.path(), "model").unwrap();
    prop_assert_eq!(restored.size(), model.len() as u64);
    for fp in &model {
        prop_assert!(restored.contains(*fp).unwrap());
    }

    let mut sorted: Vec<u64> = model.into_iter().collect();
    sorted.sort_unstable();
    let expected = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .min()
        .unwrap_or(u64::MAX);
    prop_assert_eq!(restored.check_fps().unwrap(), expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_disk_set_matches_model(batch in fingerprint_strategy()) {
        check_against_model(FpSetKind::Disk, &batch)?;
    }

    #[test]
    fn test_memory_set_matches_model(batch in fingerprint_strategy()) {
        check_against_model(FpSetKind::Memory, &batch)?;
    }
}

/// A checkpoint whose segment files overlap restores fewer distinct
/// fingerprints than its manifest records, which must fail `init`.
#[test]
fn test_overlapping_checkpoint_segments_are_rejected() {
    let fixture = TestFixture::new().unwrap();
    let mut manager = CheckpointManager::open(fixture.path(), "dup", false).unwrap();
    let mut staging = manager.begin(3, 1).unwrap();
    for index in 0..2 {
        let mut writer = staging.segment_writer(index).unwrap();
        for fp in [1u64, 2, 3] {
            writer.push(fp).unwrap();
        }
        let written = writer.finish().unwrap();
        staging.record(index, &written);
    }
    assert_eq!(manager.stage(staging).unwrap(), 6);
    manager.commit().unwrap();

    let result = DiskFpSet::init(&small_config(FpSetKind::Disk), 3, fixture.path(), "dup");
    assert!(matches!(result, Err(FpSetError::CorruptCheckpoint { .. })));
}

/// A checkpoint written with one geometry restores into another.
#[test]
fn test_restore_into_different_geometry() {
    let fixture = TestFixture::new().unwrap();
    let mut wide = small_config(FpSetKind::Disk);
    wide.memory.segment_bits = 3;
    wide.memory.budget_bytes = 64 * 1024;

    let set = DiskFpSet::init(&wide, 9, fixture.path(), "geo").unwrap();
    for i in 0..1_000u64 {
        set.put(i.wrapping_mul(0xff51_afd7_ed55_8ccd)).unwrap();
    }
    set.begin_chkpt().unwrap();
    set.commit_chkpt().unwrap();
    drop(set);

    let narrow = small_config(FpSetKind::Disk);
    let restored = DiskFpSet::init(&narrow, 11, fixture.path(), "geo").unwrap();
    assert_eq!(restored.plan().segment_count(), 4);
    assert_eq!(restored.size(), 1_000);
    for i in 0..1_000u64 {
        assert!(restored.contains(i.wrapping_mul(0xff51_afd7_ed55_8ccd)).unwrap());
    }
}

/// A checkpoint segment whose header claims an impossible entry count is
/// reported as corrupt instead of aborting recovery.
#[test]
fn test_open_rejects_oversized_header_count() {
    let fixture = TestFixture::new().unwrap();
    let config = small_config(FpSetKind::Disk);
    let set = open_fp_set(&config, 5, fixture.path(), "hdr").unwrap();
    for fp in 0..99u64 {
        set.put(fp << 40).unwrap();
    }
    set.begin_chkpt().unwrap();
    set.commit_chkpt().unwrap();
    set.close().unwrap();

    let segment = fixture.path().join("hdr.chkpt.00000001").join("seg-0000.fps");
    let mut bytes = std::fs::read(&segment).unwrap();
    bytes[8..16].fill(0xff);
    std::fs::write(&segment, bytes).unwrap();

    for kind in [FpSetKind::Disk, FpSetKind::Memory] {
        let result = open_fp_set(&small_config(kind), 5, fixture.path(), "hdr");
        assert!(matches!(result, Err(FpSetError::CorruptCheckpoint { .. })));
    }
}

/// Loader failures surface as configuration errors of the set.
#[test]
fn test_open_with_loader() {
    let fixture = TestFixture::new().unwrap();
    let missing = ConfigLoader::new(Some(fixture.path().join("absent.toml")), "FPSET_TEST_ABSENT");
    assert!(matches!(
        open_fp_set_with_loader(&missing, 0, fixture.path(), "loaded"),
        Err(FpSetError::Config(ConfigError::FileNotFound(_)))
    ));

    let file = fixture
        .create_file(
            "small.toml",
            "kind = \"disk\"\n[memory]\nbudget_bytes = 65536\nsegment_bits = 1\n[storage]\nsync_writes = false\n",
        )
        .unwrap();
    let loader = ConfigLoader::new(Some(&file), "FPSET_TEST_SMALL");
    let set = open_fp_set_with_loader(&loader, 0, fixture.path(), "loaded").unwrap();
    assert!(!set.put(17).unwrap());
    assert!(set.statistics().is_some());
    set.close().unwrap();
}
