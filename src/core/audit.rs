//! Audit trail of task state changes.
//!
//! The scheduler emits one [`TaskEvent`] per transition it wins, plus one per
//! cancellation request on a running task.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::TaskState;
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Related task identifier.
    pub task_id: TaskId,
    /// State before the change; `None` on submission.
    pub from: Option<TaskState>,
    /// State after the change.
    pub to: TaskState,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context (error text, cancel origin).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: TaskEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<TaskEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events for one task, oldest first.
    #[must_use]
    pub fn events_for(&self, task_id: TaskId) -> Vec<TaskEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: TaskEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_task_event(
    task_id: TaskId,
    from: Option<TaskState>,
    to: TaskState,
    detail: Option<String>,
) -> TaskEvent {
    TaskEvent {
        task_id,
        from,
        to,
        created_at_ms: now_ms(),
        detail,
    }
}
