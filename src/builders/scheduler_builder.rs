//! Builders to construct a scheduler from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{SchedulerConfig, StoreBackendConfig};
use crate::core::{
    AuditSink, InMemoryAuditSink, Scheduler, SchedulerError, TaskExecutor, TaskQueue, TaskStore,
    WorkerPool,
};
use crate::infra::store::{InMemoryTaskStore, JsonlTaskStore};

/// Scheduler over a backend chosen at runtime.
pub type DynScheduler<E> = Scheduler<dyn TaskStore, E>;

/// Open the configured task store backend.
///
/// # Errors
///
/// [`SchedulerError::Unavailable`] if a file store cannot be opened.
pub fn open_store(cfg: &StoreBackendConfig) -> Result<Arc<dyn TaskStore>, SchedulerError> {
    match cfg {
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryTaskStore::new())),
        StoreBackendConfig::File { path } => Ok(Arc::new(JsonlTaskStore::open(path)?)),
    }
}

/// In-memory audit sink sized by `audit_capacity`, if enabled.
#[must_use]
pub fn build_audit_sink(cfg: &SchedulerConfig) -> Option<Arc<InMemoryAuditSink>> {
    (cfg.audit_capacity > 0).then(|| Arc::new(InMemoryAuditSink::new(cfg.audit_capacity)))
}

/// Build a scheduler from configuration. The scheduler is not started.
///
/// When `audit_capacity` is set, an in-memory audit sink is attached; use
/// [`build_scheduler_with_audit`] to keep a handle on the sink.
///
/// # Errors
///
/// [`SchedulerError::InvalidArgument`] for invalid configuration,
/// [`SchedulerError::Unavailable`] if the store cannot be opened.
pub fn build_scheduler<E: TaskExecutor>(
    cfg: &SchedulerConfig,
    executor: E,
) -> Result<Arc<DynScheduler<E>>, SchedulerError> {
    let audit = build_audit_sink(cfg).map(|sink| sink as Arc<dyn AuditSink>);
    build_scheduler_with_audit(cfg, executor, audit)
}

/// Build a scheduler from configuration with an explicit audit sink.
///
/// # Errors
///
/// See [`build_scheduler`].
pub fn build_scheduler_with_audit<E: TaskExecutor>(
    cfg: &SchedulerConfig,
    executor: E,
    audit: Option<Arc<dyn AuditSink>>,
) -> Result<Arc<DynScheduler<E>>, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::InvalidArgument(format!("config invalid: {e}")))?;

    let store = open_store(&cfg.store)?;
    let queue = Arc::new(TaskQueue::new(cfg.max_queue_depth));
    let pool = WorkerPool::new(cfg.pool.clone(), executor)
        .map_err(|e| SchedulerError::InvalidArgument(e.to_string()))?;

    let mut scheduler = Scheduler::new(cfg.limits(), store, queue, Arc::new(pool));
    if let Some(sink) = audit {
        scheduler = scheduler.with_audit(sink);
    }
    info!(
        workers = cfg.pool.worker_count,
        max_queue_depth = cfg.max_queue_depth,
        store = ?cfg.store,
        "scheduler built"
    );
    Ok(Arc::new(scheduler))
}
