//! Tests for builder functions

use prometheus_task_scheduler::builders::{build_audit_sink, build_scheduler, open_store};
use prometheus_task_scheduler::config::{SchedulerConfig, StoreBackendConfig, WorkerPoolConfig};
use prometheus_task_scheduler::core::{ScheduleOptions, SchedulerError, TaskState};
use prometheus_task_scheduler::infra::OpExecutor;

fn small_config() -> SchedulerConfig {
    SchedulerConfig {
        pool: WorkerPoolConfig::new().with_worker_count(1),
        max_queue_depth: 8,
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_build_scheduler_is_not_started() {
    let scheduler = build_scheduler(&small_config(), OpExecutor).unwrap();

    let id = scheduler
        .schedule(serde_json::json!({"op": "echo", "value": 1}), ScheduleOptions::default())
        .unwrap();
    // No workers yet, so the task waits in the queue.
    assert_eq!(scheduler.get(id).unwrap().state, TaskState::Queued);
    assert_eq!(scheduler.stats().queue_depth, 1);
    assert_eq!(scheduler.stats().pool.worker_count, 1);
}

#[test]
fn test_build_scheduler_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        max_queue_depth: 0,
        ..small_config()
    };
    let err = build_scheduler(&cfg, OpExecutor).err().unwrap();
    assert!(matches!(err, SchedulerError::InvalidArgument(msg) if msg.contains("max_queue_depth")));
}

#[test]
fn test_audit_sink_follows_capacity() {
    assert!(build_audit_sink(&small_config()).is_none());

    let cfg = SchedulerConfig {
        audit_capacity: 16,
        ..small_config()
    };
    assert!(build_audit_sink(&cfg).is_some());
}

#[test]
fn test_open_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&StoreBackendConfig::File {
        path: dir.path().to_path_buf(),
    })
    .unwrap();
    let first = store.next_id().unwrap();
    assert!(store.next_id().unwrap() > first);
    assert!(dir.path().join("tasks.jsonl").exists());
}
