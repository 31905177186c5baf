//! Transport-neutral service surface: request/response models and the
//! [`SchedulerService`] trait.
//!
//! Every trait method defaults to [`SchedulerError::Unimplemented`], so a
//! transport can mount a partial service and grow it one operation at a time.
//! [`SchedulerApi`] implements all four over a [`Scheduler`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{
    CancelAck, ErrorCode, ScheduleOptions, Scheduler, SchedulerError, TaskExecutor, TaskFilter,
    TaskRecord, TaskState, TaskStore,
};
use crate::util::serde::{Priority, TaskId};

/// `ScheduleTask` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTaskRequest {
    /// Opaque work description.
    pub payload: serde_json::Value,
    /// Dispatch priority; defaults to [`Priority::NORMAL`].
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Start delay in milliseconds.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl ScheduleTaskRequest {
    fn options(&self) -> ScheduleOptions {
        ScheduleOptions {
            priority: self.priority.unwrap_or_default(),
            delay_ms: self.delay_ms.unwrap_or_default(),
        }
    }
}

/// `ScheduleTask` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTaskResponse {
    /// Id of the new task.
    pub task_id: TaskId,
}

/// `GetTask` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTaskRequest {
    /// Task to fetch.
    pub task_id: TaskId,
}

/// `GetTask` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTaskResponse {
    /// Full task record.
    pub task: TaskRecord,
}

/// `ListTasks` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTasksRequest {
    /// Accepted states; empty accepts all.
    pub states: Vec<TaskState>,
    /// Inclusive lower bound on creation time.
    pub created_after_ms: Option<u128>,
    /// Exclusive upper bound on creation time.
    pub created_before_ms: Option<u128>,
    /// Token from a previous response.
    pub page_token: Option<String>,
    /// Records per page.
    pub page_size: Option<usize>,
}

impl ListTasksRequest {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            states: self.states.clone(),
            created_after_ms: self.created_after_ms,
            created_before_ms: self.created_before_ms,
        }
    }
}

/// `ListTasks` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTasksResponse {
    /// Matching records in creation order.
    pub tasks: Vec<TaskRecord>,
    /// Token for the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// `CancelTask` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    /// Task to cancel.
    pub task_id: TaskId,
}

/// `CancelTask` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    /// Task the request targeted.
    pub task_id: TaskId,
    /// State after the request.
    pub state: TaskState,
    /// The task is still running and has been signalled.
    pub pending: bool,
}

impl From<CancelAck> for CancelTaskResponse {
    fn from(ack: CancelAck) -> Self {
        Self {
            task_id: ack.task_id,
            state: ack.state,
            pending: ack.is_pending(),
        }
    }
}

/// Error body for transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl From<&SchedulerError> for ErrorResponse {
    fn from(err: &SchedulerError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// The four scheduler operations.
#[async_trait]
pub trait SchedulerService: Send + Sync {
    /// Submit a task.
    async fn schedule_task(
        &self,
        _req: ScheduleTaskRequest,
    ) -> Result<ScheduleTaskResponse, SchedulerError> {
        Err(SchedulerError::Unimplemented("ScheduleTask"))
    }

    /// Fetch one task.
    async fn get_task(&self, _req: GetTaskRequest) -> Result<GetTaskResponse, SchedulerError> {
        Err(SchedulerError::Unimplemented("GetTask"))
    }

    /// List tasks.
    async fn list_tasks(
        &self,
        _req: ListTasksRequest,
    ) -> Result<ListTasksResponse, SchedulerError> {
        Err(SchedulerError::Unimplemented("ListTasks"))
    }

    /// Cancel a task.
    async fn cancel_task(
        &self,
        _req: CancelTaskRequest,
    ) -> Result<CancelTaskResponse, SchedulerError> {
        Err(SchedulerError::Unimplemented("CancelTask"))
    }
}

/// Service answering every operation with `Unimplemented`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedScheduler;

impl SchedulerService for UnimplementedScheduler {}

/// [`SchedulerService`] backed by a [`Scheduler`].
pub struct SchedulerApi<S: TaskStore + ?Sized, E: TaskExecutor> {
    scheduler: Arc<Scheduler<S, E>>,
}

impl<S: TaskStore + ?Sized, E: TaskExecutor> SchedulerApi<S, E> {
    /// Wrap a scheduler.
    pub const fn new(scheduler: Arc<Scheduler<S, E>>) -> Self {
        Self { scheduler }
    }

    /// The wrapped scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler<S, E>> {
        &self.scheduler
    }
}

impl<S: TaskStore + ?Sized, E: TaskExecutor> Clone for SchedulerApi<S, E> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

#[async_trait]
impl<S: TaskStore + ?Sized + 'static, E: TaskExecutor> SchedulerService for SchedulerApi<S, E> {
    async fn schedule_task(
        &self,
        req: ScheduleTaskRequest,
    ) -> Result<ScheduleTaskResponse, SchedulerError> {
        let options = req.options();
        let task_id = self.scheduler.schedule(req.payload, options)?;
        Ok(ScheduleTaskResponse { task_id })
    }

    async fn get_task(&self, req: GetTaskRequest) -> Result<GetTaskResponse, SchedulerError> {
        let task = self.scheduler.get(req.task_id)?;
        Ok(GetTaskResponse { task })
    }

    async fn list_tasks(
        &self,
        req: ListTasksRequest,
    ) -> Result<ListTasksResponse, SchedulerError> {
        let page = self
            .scheduler
            .list(&req.filter(), req.page_token.as_deref(), req.page_size)?;
        Ok(ListTasksResponse {
            tasks: page.tasks,
            next_page_token: page.next_page_token,
        })
    }

    async fn cancel_task(
        &self,
        req: CancelTaskRequest,
    ) -> Result<CancelTaskResponse, SchedulerError> {
        Ok(self.scheduler.cancel(req.task_id)?.into())
    }
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Entries waiting in the queue.
    pub queue_depth: usize,
    /// Executions in progress.
    pub active_tasks: u64,
}

/// Return a health payload. Unhealthy once the scheduler is shutting down.
pub fn health<S: TaskStore + ?Sized, E: TaskExecutor>(scheduler: &Scheduler<S, E>) -> Health {
    let stats = scheduler.stats();
    Health {
        ok: !scheduler.queue().is_closed() && !scheduler.pool().is_shutdown(),
        queue_depth: stats.queue_depth,
        active_tasks: stats.pool.active_tasks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unimplemented_defaults() {
        let svc = UnimplementedScheduler;
        let err = svc
            .schedule_task(ScheduleTaskRequest {
                payload: json!({"op": "echo"}),
                priority: None,
                delay_ms: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
        assert!(matches!(
            svc.get_task(GetTaskRequest { task_id: 1 }).await,
            Err(SchedulerError::Unimplemented("GetTask"))
        ));
        assert!(matches!(
            svc.list_tasks(ListTasksRequest::default()).await,
            Err(SchedulerError::Unimplemented("ListTasks"))
        ));
        assert!(matches!(
            svc.cancel_task(CancelTaskRequest { task_id: 1 }).await,
            Err(SchedulerError::Unimplemented("CancelTask"))
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let req: ScheduleTaskRequest =
            serde_json::from_str(r#"{"payload": {"op": "sleep", "ms": 5}, "priority": 7}"#).unwrap();
        assert_eq!(req.options(), ScheduleOptions::with_priority(7u8));

        let list: ListTasksRequest =
            serde_json::from_str(r#"{"states": ["queued", "running"], "page_size": 10}"#).unwrap();
        assert_eq!(list.filter().states, vec![TaskState::Queued, TaskState::Running]);
        assert_eq!(list.page_token, None);

        let body = ErrorResponse::from(&SchedulerError::NotFound(4));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"code": "not_found", "message": "task not found: 4"})
        );
    }
}
