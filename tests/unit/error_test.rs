//! Tests for error types

use prometheus_task_scheduler::core::{ErrorCode, SchedulerError, StoreError, TaskState};

#[test]
fn test_invalid_argument_error() {
    let err = SchedulerError::InvalidArgument("payload must not be empty".to_string());
    assert_eq!(format!("{}", err), "invalid argument: payload must not be empty");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_not_found_error() {
    let err = SchedulerError::NotFound(42);
    assert_eq!(format!("{}", err), "task not found: 42");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn test_resource_exhausted_error() {
    let err = SchedulerError::ResourceExhausted("queue full".to_string());
    assert_eq!(format!("{}", err), "resource exhausted: queue full");
}

#[test]
fn test_unimplemented_error() {
    let err = SchedulerError::Unimplemented("ListTasks");
    assert_eq!(format!("{}", err), "operation not implemented: ListTasks");
    assert_eq!(err.code(), ErrorCode::Unimplemented);
}

#[test]
fn test_conflict_display() {
    let err = StoreError::Conflict {
        id: 3,
        expected: TaskState::Queued,
        actual: TaskState::Cancelled,
    };
    assert_eq!(
        format!("{}", err),
        "conflict on task 3: expected queued, found cancelled"
    );
}

#[test]
fn test_store_unavailable_surfaces_as_unavailable() {
    let err: SchedulerError = StoreError::Unavailable("disk gone".to_string()).into();
    assert!(matches!(err, SchedulerError::Unavailable(ref msg) if msg == "disk gone"));
}

#[test]
fn test_error_code_wire_names() {
    assert_eq!(
        serde_json::to_string(&ErrorCode::ResourceExhausted).unwrap(),
        "\"resource_exhausted\""
    );
}
