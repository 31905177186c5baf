//! Tests for the service surface

use prometheus_task_scheduler::builders::build_scheduler;
use prometheus_task_scheduler::config::{SchedulerConfig, WorkerPoolConfig};
use prometheus_task_scheduler::core::{ErrorCode, SchedulerError, TaskState};
use prometheus_task_scheduler::infra::OpExecutor;
use prometheus_task_scheduler::util::Priority;
use prometheus_task_scheduler::runtime::{
    health, CancelTaskRequest, GetTaskRequest, ListTasksRequest, ScheduleTaskRequest,
    SchedulerApi, SchedulerService,
};
use serde_json::json;

fn api() -> SchedulerApi<dyn prometheus_task_scheduler::core::TaskStore, OpExecutor> {
    let cfg = SchedulerConfig {
        pool: WorkerPoolConfig::new().with_worker_count(1),
        ..SchedulerConfig::default()
    };
    // Not started: tasks stay queued, which keeps these checks deterministic.
    SchedulerApi::new(build_scheduler(&cfg, OpExecutor).unwrap())
}

#[tokio::test]
async fn test_schedule_get_list_cancel() {
    let api = api();

    let scheduled = api
        .schedule_task(ScheduleTaskRequest {
            payload: json!({"op": "sleep", "ms": 10}),
            priority: Some(Priority(3)),
            delay_ms: None,
        })
        .await
        .unwrap();

    let got = api
        .get_task(GetTaskRequest { task_id: scheduled.task_id })
        .await
        .unwrap();
    assert_eq!(got.task.state, TaskState::Queued);
    assert_eq!(got.task.priority.value(), 3);

    let listed = api.list_tasks(ListTasksRequest::default()).await.unwrap();
    assert_eq!(listed.tasks.len(), 1);
    assert!(listed.next_page_token.is_none());

    let cancelled = api
        .cancel_task(CancelTaskRequest { task_id: scheduled.task_id })
        .await
        .unwrap();
    assert_eq!(cancelled.state, TaskState::Cancelled);
    assert!(!cancelled.pending);

    let queued = api
        .list_tasks(ListTasksRequest {
            states: vec![TaskState::Queued],
            ..ListTasksRequest::default()
        })
        .await
        .unwrap();
    assert!(queued.tasks.is_empty());
}

#[tokio::test]
async fn test_errors_map_to_codes() {
    let api = api();

    let err = api
        .schedule_task(ScheduleTaskRequest {
            payload: json!({}),
            priority: None,
            delay_ms: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = api.get_task(GetTaskRequest { task_id: 404 }).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(404)));

    let err = api
        .list_tasks(ListTasksRequest {
            page_token: Some("garbage".into()),
            ..ListTasksRequest::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_health_reflects_shutdown() {
    let api = api();
    assert!(health(api.scheduler()).ok);
    api.scheduler().shutdown();
    assert!(!health(api.scheduler()).ok);
}
