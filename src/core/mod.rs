//! Core scheduling abstractions: task model, store contract, queue, worker
//! pool and the scheduler engine.

pub mod audit;
pub mod error;
pub mod executor;
pub mod query;
pub mod queue;
mod reaper;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod worker_pool;

pub use audit::{build_task_event, AuditSink, InMemoryAuditSink, TaskEvent};
pub use error::{AppResult, ErrorCode, SchedulerError, StoreError};
pub use executor::{ExecutionContext, ExecutionError, ExecutionResult, TaskExecutor};
pub use query::{decode_page_token, encode_page_token, QueryService, TaskPage};
pub use queue::{QueueError, QueuedTask, TaskQueue};
pub use scheduler::{
    CancelAck, RecoveryReport, Scheduler, SchedulerLimits, SchedulerStats, INTERRUPTED_ERROR,
};
pub use store::{Cursor, Page, PageRequest, TaskFilter, TaskStore};
pub use task::{ScheduleOptions, TaskRecord, TaskState, Transition};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
