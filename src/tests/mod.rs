//! Test modules for the Mauka fingerprint set.
//!
//! This module contains crate-internal testing infrastructure:
//! - Configuration loading and validation tests
//! - Error taxonomy tests
//! - Cross-component fingerprint set tests using proptest
//! - Test fixtures and utilities
//!
//! Component unit tests live next to their modules; the public contract is
//! exercised from `tests/`.

pub mod config_tests;
pub mod error_tests;
pub mod fpset_tests;

// Re-export commonly used testing tools to simplify imports in test modules
pub use test_utils::{fingerprint_strategy, small_config, TestFixture};
