//! Service surface exposed to transports.

pub mod api;

pub use api::{
    health, CancelTaskRequest, CancelTaskResponse, ErrorResponse, GetTaskRequest,
    GetTaskResponse, Health, ListTasksRequest, ListTasksResponse, ScheduleTaskRequest,
    ScheduleTaskResponse, SchedulerApi, SchedulerService, UnimplementedScheduler,
};
