//! Task execution trait and the context handed to executors.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::util::serde::{Priority, TaskId};

/// Why an execution did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The work failed; the message is stored on the task.
    #[error("{0}")]
    Failed(String),
    /// The executor observed the cancellation signal and stopped.
    #[error("cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Shorthand for [`ExecutionError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Outcome of one execution.
pub type ExecutionResult = Result<serde_json::Value, ExecutionError>;

/// Per-execution information passed to [`TaskExecutor::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// Lease held by this execution.
    pub lease_id: Uuid,
    /// Priority the task was scheduled with.
    pub priority: Priority,
    cancel: CancellationToken,
}

impl ExecutionContext {
    /// Build a context around a lease's cancellation token.
    #[must_use]
    pub const fn new(
        task_id: TaskId,
        lease_id: Uuid,
        priority: Priority,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            lease_id,
            priority,
            cancel,
        }
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The underlying token, for handing to nested work.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Runs task payloads.
///
/// Called from a dedicated worker thread that drives its own single-threaded
/// tokio runtime, so CPU-heavy work does not stall the caller's runtime.
/// Cancellation is cooperative: implementations should watch
/// [`ExecutionContext::cancelled`] and return [`ExecutionError::Cancelled`].
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_scheduler::core::{ExecutionContext, ExecutionResult, TaskExecutor};
///
/// #[derive(Clone)]
/// struct Upper;
///
/// #[async_trait]
/// impl TaskExecutor for Upper {
///     async fn execute(&self, payload: serde_json::Value, _ctx: ExecutionContext) -> ExecutionResult {
///         Ok(payload.as_str().unwrap_or_default().to_uppercase().into())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + Clone + 'static {
    /// Execute `payload` and report the outcome.
    async fn execute(&self, payload: serde_json::Value, ctx: ExecutionContext) -> ExecutionResult;
}
