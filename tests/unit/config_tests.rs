//! Unit tests for configuration parsing, validation and overrides.
//!
//! Validates:
//! - An empty document yields every default
//! - Explicit values override defaults per section
//! - Validation rejects zero sizes and out-of-range error rates
//! - `HTTPQUEUE_*` environment variables override parsed values

use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use httpqueue::mode::AppMode;
use httpqueue::{AppError, GlobalConfig};

fn sample_toml() -> &'static str {
    r#"
mode = "workers"

[http]
bind_addr = "127.0.0.1:9090"

[storage]
db_path = "/var/lib/httpqueue/timers.db"
max_connections = 4
timer_max_ttl_days = 7
archive_filter_capacity = 5000
archive_filter_error_rate = 0.001

[relay]
frequency_ms = 100
batch_size = 50

[producer]
max_retry = 3

[consumer]
concurrency = 4
poll_interval_ms = 50
task_timeout_seconds = 5
lease_seconds = 20

[delivery]
request_timeout_seconds = 2
max_redirects = 3
"#
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.mode, AppMode::All);
    assert_eq!(config.http.bind_addr, "0.0.0.0:8080");
    assert_eq!(config.storage.timer_max_ttl_days, 180);
    assert_eq!(config.storage.archive_filter_capacity, 1_000_000);
    assert!((config.storage.archive_filter_error_rate - 0.01).abs() < f64::EPSILON);
    assert_eq!(config.relay.frequency(), Duration::from_millis(500));
    assert_eq!(config.relay.batch_size, 10);
    assert_eq!(config.producer.max_retry, 10);
    assert_eq!(config.consumer.concurrency, 10);
    assert_eq!(config.consumer.task_timeout(), Duration::from_secs(30));
    assert_eq!(config.delivery.max_redirects, 10);
}

#[test]
fn explicit_values_override_defaults() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config");

    assert_eq!(config.mode, AppMode::Workers);
    assert_eq!(config.http.bind_addr, "127.0.0.1:9090");
    assert_eq!(
        config.storage.db_path,
        PathBuf::from("/var/lib/httpqueue/timers.db")
    );
    assert_eq!(config.storage.max_connections, 4);
    assert_eq!(config.storage.timer_max_ttl(), chrono::Duration::days(7));
    assert_eq!(config.storage.busy_timeout(), Duration::from_millis(5000));
    assert_eq!(config.relay.frequency(), Duration::from_millis(100));
    assert_eq!(config.relay.batch_size, 50);
    assert_eq!(config.producer.max_retry, 3);
    assert_eq!(config.consumer.poll_interval(), Duration::from_millis(50));
    assert_eq!(config.consumer.lease(), Duration::from_secs(20));
    assert_eq!(config.delivery.request_timeout(), Duration::from_secs(2));
}

#[test]
fn zero_batch_size_is_rejected() {
    let err = GlobalConfig::from_toml_str("[relay]\nbatch_size = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("batch_size")));
}

#[test]
fn zero_frequency_is_rejected() {
    let err = GlobalConfig::from_toml_str("[relay]\nfrequency_ms = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("frequency_ms")));
}

#[test]
fn zero_concurrency_is_rejected() {
    let err = GlobalConfig::from_toml_str("[consumer]\nconcurrency = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("concurrency")));
}

#[test]
fn zero_task_timeout_and_lease_are_rejected() {
    let err = GlobalConfig::from_toml_str("[consumer]\ntask_timeout_seconds = 0")
        .expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("task_timeout_seconds")));

    let err =
        GlobalConfig::from_toml_str("[consumer]\nlease_seconds = 0").expect_err("invalid");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("lease_seconds")));
}

#[test]
fn lease_must_outlive_task_timeout() {
    for (timeout, lease) in [(30, 30), (30, 10)] {
        let raw = format!("[consumer]\ntask_timeout_seconds = {timeout}\nlease_seconds = {lease}");
        let err = GlobalConfig::from_toml_str(&raw).expect_err("invalid");
        assert!(
            matches!(err, AppError::Config(ref msg) if msg.contains("must exceed")),
            "timeout {timeout}, lease {lease}"
        );
    }

    let config = GlobalConfig::from_toml_str("[consumer]\ntask_timeout_seconds = 30\nlease_seconds = 31")
        .expect("valid");
    assert_eq!(config.consumer.lease(), Duration::from_secs(31));
}

#[test]
fn error_rate_must_be_a_probability() {
    for rate in ["0.0", "1.0", "1.5", "-0.1"] {
        let raw = format!("[storage]\narchive_filter_error_rate = {rate}");
        let err = GlobalConfig::from_toml_str(&raw).expect_err(rate);
        assert!(matches!(err, AppError::Config(_)), "{rate}");
    }
}

#[test]
fn unknown_mode_is_rejected() {
    let err = GlobalConfig::from_toml_str("mode = \"sideways\"").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn malformed_toml_is_rejected() {
    let err = GlobalConfig::from_toml_str("[relay\nbatch_size = 1").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("config");
    assert_eq!(config.relay.batch_size, 50);
}

#[test]
fn load_from_missing_path_fails() {
    let err = GlobalConfig::load_from_path("/nonexistent/httpqueue.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
#[serial]
fn env_overrides_apply() {
    std::env::set_var("HTTPQUEUE_MODE", "relay");
    std::env::set_var("HTTPQUEUE_DB_PATH", "/tmp/override.db");
    std::env::set_var("HTTPQUEUE_BIND_ADDR", "127.0.0.1:1234");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();

    std::env::remove_var("HTTPQUEUE_MODE");
    std::env::remove_var("HTTPQUEUE_DB_PATH");
    std::env::remove_var("HTTPQUEUE_BIND_ADDR");

    result.expect("overrides");
    assert_eq!(config.mode, AppMode::Relay);
    assert_eq!(config.storage.db_path, PathBuf::from("/tmp/override.db"));
    assert_eq!(config.http.bind_addr, "127.0.0.1:1234");
}

#[test]
#[serial]
fn invalid_env_mode_is_rejected() {
    std::env::set_var("HTTPQUEUE_MODE", "everything");
    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();
    std::env::remove_var("HTTPQUEUE_MODE");

    assert!(matches!(result, Err(AppError::Config(_))));
    assert_eq!(config.mode, AppMode::All);
}

#[test]
fn mode_selects_components() {
    assert!(AppMode::All.runs_api() && AppMode::All.runs_relay() && AppMode::All.runs_workers());
    assert!(AppMode::Api.runs_api());
    assert!(!AppMode::Api.runs_relay() && !AppMode::Api.runs_workers());
    assert!(AppMode::Relay.runs_relay() && !AppMode::Relay.runs_api());
    assert!(AppMode::Workers.runs_workers() && !AppMode::Workers.runs_relay());
}

#[test]
fn mode_round_trips_through_strings() {
    for mode in [AppMode::All, AppMode::Api, AppMode::Relay, AppMode::Workers] {
        let parsed: AppMode = mode.to_string().parse().expect("parse");
        assert_eq!(parsed, mode);
    }
}
