//! Tests for configuration

use std::path::PathBuf;
use std::time::Duration;

use prometheus_task_scheduler::config::{SchedulerConfig, StoreBackendConfig, WorkerPoolConfig};

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "pool": {"worker_count": 4},
        "max_queue_depth": 100,
        "cancel_grace_ms": 500,
        "store": {"kind": "file", "path": "/tmp/sched"}
    }"#;

    let cfg = SchedulerConfig::from_json_str(json).expect("config should parse");
    assert_eq!(cfg.pool.worker_count, 4);
    assert_eq!(cfg.max_queue_depth, 100);
    assert_eq!(cfg.store, StoreBackendConfig::File { path: PathBuf::from("/tmp/sched") });

    let limits = cfg.limits();
    assert_eq!(limits.cancel_grace, Some(Duration::from_millis(500)));
    assert_eq!(limits.max_priority, 9);
}

#[test]
fn test_missing_fields_take_defaults() {
    let cfg = SchedulerConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg, SchedulerConfig::default());
    assert_eq!(cfg.store, StoreBackendConfig::InMemory);
    assert_eq!(cfg.cancel_grace_ms, None);
}

#[test]
fn test_validation_rejects_zero_queue_depth() {
    let err = SchedulerConfig::from_json_str(r#"{"max_queue_depth": 0}"#).unwrap_err();
    assert!(err.contains("max_queue_depth"));
}

#[test]
fn test_validation_rejects_bad_page_sizes() {
    let cfg = SchedulerConfig {
        default_page_size: 600,
        max_page_size: 500,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("default_page_size"));
}

#[test]
fn test_validation_rejects_zero_grace() {
    let cfg = SchedulerConfig {
        cancel_grace_ms: Some(0),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("cancel_grace_ms"));
}

#[test]
fn test_pool_errors_are_prefixed() {
    let cfg = SchedulerConfig {
        pool: WorkerPoolConfig::new().with_worker_count(0),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().starts_with("pool invalid"));
}

#[test]
fn test_parse_error_is_reported() {
    let err = SchedulerConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}
