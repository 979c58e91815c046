//! Integration test for the tracing subscriber setup.
//! Lives in its own test binary because it installs a process-wide subscriber.

use mauka_fpset_lib::config::LogConfig;
use mauka_fpset_lib::logging::init_logging;

#[test]
fn test_init_logging_once() {
    let config = LogConfig {
        json: true,
        ..LogConfig::default()
    };
    init_logging(&config).unwrap();
    tracing::info!(component = "logging_test", "subscriber installed");

    // A second global subscriber is refused.
    assert!(init_logging(&LogConfig::default()).is_err());
}
