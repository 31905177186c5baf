//! Task record, lifecycle states and the transitions between them.
//!
//! ```text
//! Created ──► Queued ──► Running ──► Succeeded
//!    │           │          ├──────► Failed
//!    └───────────┴──────────┴──────► Cancelled
//! ```
//!
//! Every mutation of a stored record goes through [`Transition::apply`], which
//! the store backends call while holding their write lock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::util::serde::{Priority, TaskId};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Persisted, not yet admitted to the queue.
    Created,
    /// Waiting in the queue for a worker.
    Queued,
    /// Claimed by a worker that holds the execution lease.
    Running,
    /// Executor returned a result.
    Succeeded,
    /// Executor reported an error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::Queued,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Lower-case name, as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Queued | Self::Cancelled)
                | (Self::Queued, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown task state `{s}`"))
    }
}

/// Scheduling hints supplied with a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Dispatch priority; higher runs first.
    pub priority: Priority,
    /// Minimum time to wait before the task becomes dispatchable.
    pub delay_ms: u64,
}

impl ScheduleOptions {
    /// Options with the given priority and no delay.
    #[must_use]
    pub fn with_priority(priority: impl Into<Priority>) -> Self {
        Self {
            priority: priority.into(),
            delay_ms: 0,
        }
    }

    /// Set the start delay.
    #[must_use]
    pub const fn delayed_by(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// The stored record of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique id, assigned at submission.
    pub id: TaskId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Opaque work description handed to the executor.
    pub payload: serde_json::Value,
    /// Queue ordering input.
    pub priority: Priority,
    /// Submission time (ms since epoch).
    pub created_at_ms: u128,
    /// Earliest dispatch time for delayed submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before_ms: Option<u128>,
    /// Set once when a worker claims the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u128>,
    /// Set once when the task reaches a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u128>,
    /// Executor output; only on `Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Executor error; only on `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cancellation was requested while the task could no longer be dequeued.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Execution lease of the worker that owns the task while `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Uuid>,
}

impl TaskRecord {
    /// A fresh record in [`TaskState::Created`].
    #[must_use]
    pub fn new(
        id: TaskId,
        payload: serde_json::Value,
        options: &ScheduleOptions,
        now_ms: u128,
    ) -> Self {
        Self {
            id,
            state: TaskState::Created,
            payload,
            priority: options.priority,
            created_at_ms: now_ms,
            not_before_ms: (options.delay_ms > 0)
                .then(|| now_ms + u128::from(options.delay_ms)),
            started_at_ms: None,
            finished_at_ms: None,
            result: None,
            error: None,
            cancel_requested: false,
            lease: None,
        }
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A state change requested against a stored record.
///
/// Lease-carrying variants only apply when the record still holds that lease;
/// `lease: None` is used for administrative transitions (grace-period expiry,
/// restart recovery, cancellation before dispatch).
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `Created -> Queued`.
    Enqueue,
    /// `Queued -> Running`, granting `lease` to the claiming worker.
    Start {
        /// Lease granted to the worker.
        lease: Uuid,
        /// Claim time.
        at_ms: u128,
    },
    /// `Running -> Succeeded`.
    Succeed {
        /// Lease of the reporting worker.
        lease: Uuid,
        /// Executor output.
        result: serde_json::Value,
        /// Completion time.
        at_ms: u128,
    },
    /// `Running -> Failed`.
    Fail {
        /// Lease of the reporting worker, if any.
        lease: Option<Uuid>,
        /// Failure description.
        error: String,
        /// Completion time.
        at_ms: u128,
    },
    /// `{Created, Queued, Running} -> Cancelled`.
    Cancel {
        /// Lease of the reporting worker, if any.
        lease: Option<Uuid>,
        /// Cancellation time.
        at_ms: u128,
    },
    /// Sets `cancel_requested` without changing state. Conflicts if the flag
    /// is already set, so only one requester sees it flip.
    RequestCancel,
}

impl Transition {
    /// State the record ends up in when applied from `from`.
    #[must_use]
    pub const fn target(&self, from: TaskState) -> TaskState {
        match self {
            Self::Enqueue => TaskState::Queued,
            Self::Start { .. } => TaskState::Running,
            Self::Succeed { .. } => TaskState::Succeeded,
            Self::Fail { .. } => TaskState::Failed,
            Self::Cancel { .. } => TaskState::Cancelled,
            Self::RequestCancel => from,
        }
    }

    fn lease(&self) -> Option<Uuid> {
        match self {
            Self::Succeed { lease, .. } => Some(*lease),
            Self::Fail { lease, .. } | Self::Cancel { lease, .. } => *lease,
            Self::Enqueue | Self::Start { .. } | Self::RequestCancel => None,
        }
    }

    /// Compare-and-swap `record` from `expected` through this transition.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] if `record.state != expected`, or on a
    ///   repeated `RequestCancel`
    /// - [`StoreError::StaleLease`] if the caller's lease is not the current one
    /// - [`StoreError::IllegalTransition`] if the edge does not exist
    pub fn apply(self, record: &mut TaskRecord, expected: TaskState) -> Result<(), StoreError> {
        if record.state != expected {
            return Err(StoreError::Conflict {
                id: record.id,
                expected,
                actual: record.state,
            });
        }

        let from = record.state;
        let to = self.target(from);
        if let Self::RequestCancel = self {
            if from.is_terminal() {
                return Err(StoreError::IllegalTransition { id: record.id, from, to });
            }
            if record.cancel_requested {
                // Another request got there first.
                return Err(StoreError::Conflict { id: record.id, expected, actual: from });
            }
            record.cancel_requested = true;
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { id: record.id, from, to });
        }
        if let Some(lease) = self.lease() {
            if from == TaskState::Running && record.lease != Some(lease) {
                return Err(StoreError::StaleLease(record.id));
            }
        }

        // Timestamps never run backwards even if the wall clock does.
        let floor = record.started_at_ms.unwrap_or(record.created_at_ms);
        match self {
            Self::Enqueue | Self::RequestCancel => {}
            Self::Start { lease, at_ms } => {
                record.started_at_ms = Some(at_ms.max(record.created_at_ms));
                record.lease = Some(lease);
            }
            Self::Succeed { result, at_ms, .. } => {
                record.result = Some(result);
                record.finished_at_ms = Some(at_ms.max(floor));
                record.lease = None;
            }
            Self::Fail { error, at_ms, .. } => {
                record.error = Some(error);
                record.finished_at_ms = Some(at_ms.max(floor));
                record.lease = None;
            }
            Self::Cancel { at_ms, .. } => {
                record.finished_at_ms = Some(at_ms.max(floor));
                record.lease = None;
            }
        }
        record.state = to;
        Ok(())
    }
}
