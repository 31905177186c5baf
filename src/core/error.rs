//! Error types for scheduler operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::TaskState;
use crate::util::serde::TaskId;

/// Errors surfaced by the public scheduler operations.
///
/// Task-level execution failures are never reported here; they are recorded
/// on the task and observed through `GetTask`/`ListTasks`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or out-of-range input. Never retried by the scheduler.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Unknown task id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// Admission rejected because the queue is at its configured depth.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The task store (or the scheduler itself) cannot serve requests.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Operation has no implementation on this service.
    #[error("operation not implemented: {0}")]
    Unimplemented(&'static str),
}

/// Stable error classification for transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// See [`SchedulerError::InvalidArgument`].
    InvalidArgument,
    /// See [`SchedulerError::NotFound`].
    NotFound,
    /// See [`SchedulerError::ResourceExhausted`].
    ResourceExhausted,
    /// See [`SchedulerError::Unavailable`].
    Unavailable,
    /// See [`SchedulerError::Unimplemented`].
    Unimplemented,
}

impl SchedulerError {
    /// Classification used when mapping onto a wire status.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Errors produced by [`TaskStore`](crate::core::store::TaskStore) backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// `put` was called with an id that is already stored.
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    /// Compare-and-swap failed: the record is not in the expected state.
    #[error("conflict on task {id}: expected {expected}, found {actual}")]
    Conflict {
        /// Task the update targeted.
        id: TaskId,
        /// State the caller expected.
        expected: TaskState,
        /// State actually stored.
        actual: TaskState,
    },
    /// The caller no longer holds the execution lease for this task.
    #[error("stale execution lease for task {0}")]
    StaleLease(TaskId),
    /// The transition is not an edge of the task state machine.
    #[error("illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        /// Task the update targeted.
        id: TaskId,
        /// Current state.
        from: TaskState,
        /// Requested state.
        to: TaskState,
    },
    /// Backend failure; every later operation reports it as well.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error means the caller raced a concurrent transition.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::StaleLease(_))
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Unavailable(msg) => Self::Unavailable(msg),
            other => Self::Unavailable(format!("internal store error: {other}")),
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
