//! Tests for the error module.
//!
//! This module contains tests for error handling and error types.

use crate::error::{config::ConfigError, FpSetError, IoResultExt};
use std::error::Error;
use std::io;
use std::path::PathBuf;

/// Test that storage errors carry their context and source.
#[test]
fn test_storage_context() {
    let result: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));
    let error = result.storage_context(|| "probing page 3").unwrap_err();

    assert!(error.is_storage());
    let display_string = format!("{error}");
    assert!(display_string.contains("probing page 3"));
    assert!(display_string.contains("file not found"));
    assert!(error.source().is_some());
}

/// Test that corrupt checkpoint errors name the offending path.
#[test]
fn test_corrupt_display() {
    let error = FpSetError::corrupt("/tmp/fps.chkpt.00000002/seg-0001.fps", "checksum mismatch");

    match &error {
        FpSetError::CorruptCheckpoint { path, reason } => {
            assert_eq!(path, &PathBuf::from("/tmp/fps.chkpt.00000002/seg-0001.fps"));
            assert_eq!(reason, "checksum mismatch");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!error.is_storage());
    assert!(format!("{error}").contains("seg-0001.fps"));
}

/// Test that nested errors convert correctly.
#[test]
fn test_nested_errors() {
    let config_error = ConfigError::ValueOutOfRange {
        key: "memory.segment_bits".to_string(),
        message: "must be at most 12".to_string(),
    };
    let error: FpSetError = config_error.into();
    let error_string = format!("{error}");
    assert!(error_string.contains("memory.segment_bits"));
    assert!(error_string.contains("must be at most 12"));

    let json_error = serde_json::from_str::<u64>("not json").unwrap_err();
    let error: FpSetError = json_error.into();
    assert!(matches!(error, FpSetError::Serialization(_)));
}

/// Test the checkpoint protocol error message.
#[test]
fn test_checkpoint_state_display() {
    let error = FpSetError::CheckpointState("commit requested without a staged checkpoint".into());
    assert_eq!(
        format!("{error}"),
        "Checkpoint protocol violation: commit requested without a staged checkpoint"
    );
}
