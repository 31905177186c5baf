//! Tests for utility functions

use prometheus_task_scheduler::util::{millis_until, now_ms, Priority, TaskId};

#[test]
fn test_priority_ordering() {
    assert!(Priority::CRITICAL > Priority::HIGH);
    assert!(Priority::HIGH > Priority::NORMAL);
    assert!(Priority::NORMAL > Priority::LOW);
    assert_eq!(Priority::default(), Priority::NORMAL);
}

#[test]
fn test_priority_wire_format_is_bare_number() {
    assert_eq!(serde_json::to_string(&Priority(5)).unwrap(), "5");
    let p: Priority = serde_json::from_str("7").unwrap();
    assert_eq!(p, Priority::HIGH);
    assert_eq!(p.to_string(), "7");
}

#[test]
fn test_clock_helpers() {
    let now = now_ms();
    assert_eq!(millis_until(now + 250, now), 250);
    assert_eq!(millis_until(now, now + 1), 0);
}

#[test]
fn test_task_id() {
    let id: TaskId = 12345;
    assert_eq!(id, 12345);
}
