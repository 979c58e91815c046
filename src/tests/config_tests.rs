//! Tests for the configuration module.
//!
//! This module contains tests for configuration loading, validation, and usage.

use crate::config::{
    memory::MAX_SEGMENT_BITS, ConfigLoader, FpSetConfig, FpSetKind, LogConfig, MemoryConfig,
    StorageConfig, Validate,
};
use crate::error::config::ConfigError;
use crate::tests::TestFixture;

/// Test that default configuration can be created and is valid.
#[test]
fn test_default_config_is_valid() {
    let config = FpSetConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.kind, FpSetKind::Disk);
    assert!(config.memory.segment_bits <= MAX_SEGMENT_BITS);
}

/// Test that configuration validation catches invalid values.
#[test]
fn test_config_validation() {
    let mut config = FpSetConfig::default();

    config.memory.budget_bytes = 0;
    assert!(config.validate().is_err());

    config.memory.budget_bytes = 1 << 20;
    config.memory.reserve_ratio = 0.95;
    assert!(config.validate().is_err());

    config.memory.reserve_ratio = 0.25;
    config.storage.max_pages_per_segment = 1;
    assert!(config.validate().is_err());

    config.storage.max_pages_per_segment = 2;
    config.storage.max_open_pages = 0;
    assert!(config.validate().is_err());

    config.storage.max_open_pages = 256;
    config.log.level = "loud".to_string();
    assert!(config.validate().is_err());

    config.log.level = "debug".to_string();
    assert!(config.validate().is_ok());
}

/// Test that validation fails for various invalid configurations.
#[test]
fn test_specific_validation_rules() {
    let memory = MemoryConfig {
        segment_bits: MAX_SEGMENT_BITS + 1,
        ..MemoryConfig::default()
    };
    assert!(matches!(
        memory.validate(),
        Err(ConfigError::ValueOutOfRange { ref key, .. }) if key == "memory.segment_bits"
    ));

    let memory = MemoryConfig {
        bucket_entries: 256,
        ..MemoryConfig::default()
    };
    assert!(memory.validate().is_err());

    let storage = StorageConfig {
        page_index_stride: 0,
        ..StorageConfig::default()
    };
    assert!(storage.validate().is_err());

    let log = LogConfig {
        level: "verbose".to_string(),
        ..LogConfig::default()
    };
    assert!(log.validate().is_err());
}

/// Test loading configuration from a file.
#[test]
fn test_load_config_from_file() {
    let fixture = TestFixture::new().unwrap();
    let config_path = fixture
        .create_file(
            "config_file_test.toml",
            r#"
    kind = "memory"

    [memory]
    budget_bytes = 1048576
    segment_bits = 1

    [storage]
    sync_writes = false
    "#,
        )
        .unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_FILE");
    let config = loader.load().unwrap();

    assert_eq!(config.kind, FpSetKind::Memory);
    assert_eq!(config.memory.budget_bytes, 1 << 20);
    assert_eq!(config.memory.segment_bits, 1);
    assert!(!config.storage.sync_writes);

    // Other values should be defaults
    assert_eq!(config.memory.bucket_entries, 8);
    assert_eq!(config.storage.page_index_stride, 512);
    assert_eq!(config.log.level, "info");
}

/// Test loading configuration with environment variable overrides.
#[test]
fn test_env_var_override() {
    let fixture = TestFixture::new().unwrap();
    let config_path = fixture
        .create_file(
            "config_env_test.toml",
            r#"
    [memory]
    budget_bytes = 1048576
    "#,
        )
        .unwrap();

    // Set environment variables with a unique prefix
    std::env::set_var("TEST_ENV__MEMORY__BUDGET_BYTES", "2097152");
    std::env::set_var("TEST_ENV__LOG__LEVEL", "warn");

    let loader = ConfigLoader::new(Some(&config_path), "TEST_ENV");
    let config = loader.load();

    // Clean up environment variables
    std::env::remove_var("TEST_ENV__MEMORY__BUDGET_BYTES");
    std::env::remove_var("TEST_ENV__LOG__LEVEL");

    let config = config.unwrap();
    assert_eq!(config.memory.budget_bytes, 2 << 20);
    assert_eq!(config.log.level, "warn");
}

/// Test that loading an invalid configuration file returns an error.
#[test]
fn test_load_invalid_config() {
    let fixture = TestFixture::new().unwrap();
    let config_path = fixture
        .create_file(
            "invalid.toml",
            r#"
    [memory
    budget_bytes = lots"
    "#,
        )
        .unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_INVALID");
    match loader.load() {
        Err(ConfigError::ParseError { origin, .. }) => assert!(origin.contains("invalid.toml")),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

/// Test that a value that parses but fails validation is rejected.
#[test]
fn test_load_rejects_invalid_values() {
    let fixture = TestFixture::new().unwrap();
    let config_path = fixture
        .create_file("zero_budget.toml", "[memory]\nbudget_bytes = 0\n")
        .unwrap();

    let loader = ConfigLoader::new(Some(&config_path), "TEST_ZERO");
    assert!(matches!(
        loader.load(),
        Err(ConfigError::ValidationError(_))
    ));
}

/// Test missing files and unsupported extensions.
#[test]
fn test_load_missing_or_unknown_file() {
    let fixture = TestFixture::new().unwrap();

    let missing = fixture.path().join("missing.toml");
    assert!(matches!(
        ConfigLoader::new(Some(&missing), "TEST_MISSING").load(),
        Err(ConfigError::FileNotFound(_))
    ));

    let ini = fixture.create_file("settings.ini", "x = 1").unwrap();
    assert!(matches!(
        ConfigLoader::new(Some(&ini), "TEST_INI").load(),
        Err(ConfigError::UnsupportedFormat(_))
    ));
}

/// Test that a rendered configuration parses back to the same values.
#[test]
fn test_toml_rendering() {
    let mut config = FpSetConfig::default();
    config.kind = FpSetKind::Memory;
    config.memory.budget_bytes = 12345678;

    let rendered = config.to_toml_string().unwrap();
    let parsed: FpSetConfig = toml::from_str(&rendered).unwrap();

    assert_eq!(parsed.kind, FpSetKind::Memory);
    assert_eq!(parsed.memory.budget_bytes, 12345678);
    assert_eq!(parsed.memory.segment_bits, config.memory.segment_bits);
    assert_eq!(parsed.storage.max_pages_per_segment, 16);
    assert!(parsed.log.source_location);
}

/// Test that the open page budget is shared by segments and never drops to zero.
#[test]
fn test_open_pages_per_segment() {
    let storage = StorageConfig {
        max_open_pages: 256,
        ..StorageConfig::default()
    };
    assert_eq!(storage.open_pages_per_segment(1), 256);
    assert_eq!(storage.open_pages_per_segment(64), 4);
    assert_eq!(storage.open_pages_per_segment(1024), 1);
}
