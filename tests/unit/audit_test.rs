//! Tests for audit sink

use prometheus_task_scheduler::core::{build_task_event, AuditSink, InMemoryAuditSink, TaskState};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_task_event(1, None, TaskState::Created, Some("submitted".to_string()));
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].from, None);
    assert_eq!(events[0].to, TaskState::Created);
    assert_eq!(events[0].detail.as_deref(), Some("submitted"));
    assert!(events[0].created_at_ms > 0);
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    sink.record(build_task_event(1, None, TaskState::Created, None));
    sink.record(build_task_event(2, None, TaskState::Created, None));
    sink.record(build_task_event(3, None, TaskState::Created, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2); // First one popped
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_audit_sink_zero_capacity_drops_everything() {
    let sink = InMemoryAuditSink::new(0);
    sink.record(build_task_event(1, None, TaskState::Created, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_events_for_task() {
    let sink = InMemoryAuditSink::new(10);
    sink.record(build_task_event(1, None, TaskState::Created, None));
    sink.record(build_task_event(2, None, TaskState::Created, None));
    sink.record(build_task_event(1, Some(TaskState::Created), TaskState::Queued, None));

    let trail: Vec<_> = sink.events_for(1).into_iter().map(|e| e.to).collect();
    assert_eq!(trail, vec![TaskState::Created, TaskState::Queued]);
}
