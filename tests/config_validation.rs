//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use action_protocol::config::{
    ConnectionConfig, HeartbeatConfig, LoggingConfig, ServiceConfig, TransferConfig,
    MAX_FRAME_LENGTH,
};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ServiceConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_heartbeat_interval_too_short() {
    let mut config = ServiceConfig::default();
    config.heartbeat.interval = Duration::from_millis(500);

    let errors = config.validate();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.contains("Heartbeat interval too short")));
}

#[test]
fn test_heartbeat_interval_too_long() {
    let mut config = ServiceConfig::default();
    config.heartbeat.interval = Duration::from_secs(7200);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Heartbeat interval too long")));
}

#[test]
fn test_pong_timeout_too_short() {
    let config = HeartbeatConfig {
        pong_timeout: Duration::from_millis(50),
        ..HeartbeatConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Pong timeout too short")));
}

#[test]
fn test_poll_interval_exceeding_heartbeat() {
    let config = HeartbeatConfig {
        interval: Duration::from_secs(2),
        poll_interval: Duration::from_secs(5),
        ..HeartbeatConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Poll interval cannot exceed the heartbeat interval")));
}

#[test]
fn test_zero_chunk_size() {
    let config = TransferConfig {
        chunk_size: 0,
        ..TransferConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Chunk size must be greater than 0")));
}

#[test]
fn test_chunk_size_must_fit_a_frame() {
    let config = TransferConfig {
        chunk_size: MAX_FRAME_LENGTH,
        ..TransferConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Chunk size too large")));
}

#[test]
fn test_destination_must_be_a_directory() {
    let file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    let config = TransferConfig {
        destination_dir: file.path().to_path_buf(),
        ..TransferConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Transfer destination is not a directory")));
}

#[test]
fn test_missing_destination_is_valid() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = TransferConfig {
        destination_dir: dir.path().join("not-yet-created"),
        ..TransferConfig::default()
    };
    assert!(config.validate().is_empty());
}

#[test]
fn test_frame_length_bounds() {
    let small = ConnectionConfig {
        max_frame_length: 100,
        ..ConnectionConfig::default()
    };
    assert!(small
        .validate()
        .iter()
        .any(|e| e.contains("Max frame length too small")));

    let large = ConnectionConfig {
        max_frame_length: 200 * 1024 * 1024,
        ..ConnectionConfig::default()
    };
    assert!(large
        .validate()
        .iter()
        .any(|e| e.contains("Max frame length too large")));
}

#[test]
fn test_zero_outbound_capacity() {
    let config = ConnectionConfig {
        outbound_capacity: 0,
        ..ConnectionConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Outbound capacity must be greater than 0")));
}

#[test]
fn test_send_timeout_too_short() {
    let config = ConnectionConfig {
        send_timeout: Duration::from_millis(1),
        ..ConnectionConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Send timeout too short")));
}

#[test]
fn test_logging_requires_an_output() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_log_file_requires_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = ServiceConfig::default();
    config.heartbeat.interval = Duration::from_millis(10);
    config.transfer.chunk_size = 0;
    config.connection.outbound_capacity = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors.len() >= 4, "Should have at least 4 errors, got {errors:?}");
}

#[test]
fn test_validate_strict_lists_every_error() {
    let mut config = ServiceConfig::default();
    config.transfer.chunk_size = 0;
    config.connection.outbound_capacity = 0;

    let err = config.validate_strict().unwrap_err();
    assert!(err.is_configuration());
    let message = err.to_string();
    assert!(message.contains("Chunk size must be greater than 0"));
    assert!(message.contains("Outbound capacity must be greater than 0"));
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = ServiceConfig::from_toml(
        r#"
        [heartbeat]
        interval = 15000
        max_failures = 5

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("Partial config should parse");

    assert_eq!(config.heartbeat.interval, Duration::from_secs(15));
    assert_eq!(config.heartbeat.max_failures, 5);
    assert_eq!(config.heartbeat.pong_timeout, Duration::from_secs(5));
    assert_eq!(config.transfer.chunk_size, 2 * 1024 * 1024);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = ServiceConfig::from_toml("[heartbeat]\ninterval = \"soon\"").unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("endpoint.toml");
    let config = ServiceConfig::default_with_overrides(|c| {
        c.heartbeat.enabled = false;
        c.transfer.destination_dir = dir.path().join("incoming");
        c.connection.disconnect_on_malformed = true;
    });

    config.save_to_file(&path).expect("Failed to save config");
    let loaded = ServiceConfig::from_file(&path).expect("Failed to load config");

    assert!(!loaded.heartbeat.enabled);
    assert_eq!(loaded.transfer.destination_dir, dir.path().join("incoming"));
    assert!(loaded.connection.disconnect_on_malformed);
}

#[test]
fn test_example_config_parses() {
    let example = ServiceConfig::example_config();
    assert!(example.contains("[heartbeat]"));
    let parsed = ServiceConfig::from_toml(&example).expect("Example config should parse");
    assert!(parsed.validate().is_empty());
}
