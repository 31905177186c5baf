//! Scheduler core: admission, dispatch, completion and cancellation.
//!
//! The scheduler is the only component that mutates task state. Every change
//! is a compare-and-swap against the task store keyed on the state the caller
//! observed, so workers, cancellation requests and the grace reaper can race
//! freely: exactly one transition wins and the losers are absorbed here.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_task_scheduler::builders::build_scheduler;
//! use prometheus_task_scheduler::config::SchedulerConfig;
//! use prometheus_task_scheduler::core::ScheduleOptions;
//! use prometheus_task_scheduler::infra::OpExecutor;
//!
//! let scheduler = build_scheduler(&SchedulerConfig::default(), OpExecutor)?;
//! scheduler.start()?;
//! let id = scheduler.schedule(
//!     serde_json::json!({"op": "sleep", "ms": 100}),
//!     ScheduleOptions::with_priority(7u8),
//! )?;
//! let task = scheduler.get(id)?;
//! scheduler.shutdown();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::audit::{build_task_event, AuditSink};
use crate::core::error::{SchedulerError, StoreError};
use crate::core::executor::{ExecutionError, ExecutionResult, TaskExecutor};
use crate::core::query::{QueryService, TaskPage};
use crate::core::queue::{QueueError, QueuedTask, TaskQueue};
use crate::core::reaper::GraceReaper;
use crate::core::store::{PageRequest, TaskFilter, TaskStore};
use crate::core::task::{ScheduleOptions, TaskRecord, TaskState, Transition};
use crate::core::worker_pool::{Claim, Dispatch, PoolCounters, PoolStats, WorkerPool};
use crate::util::clock::now_ms;
use crate::util::serde::TaskId;

/// Error recorded on tasks found `Running` when the scheduler starts.
pub const INTERRUPTED_ERROR: &str = "interrupted: scheduler restarted while task was running";

const RECOVERY_PAGE: usize = 256;

/// Admission and query limits enforced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Highest accepted priority.
    pub max_priority: u8,
    /// Largest accepted payload, measured as serialized JSON.
    pub max_payload_bytes: usize,
    /// Longest accepted start delay.
    pub max_delay_ms: u64,
    /// Grace before a cancel-requested running task is cancelled
    /// administratively; `None` keeps cancellation purely cooperative.
    pub cancel_grace: Option<Duration>,
    /// Re-reads allowed when a cancel races another transition.
    pub max_conflict_retries: u32,
    /// Page size used when the caller gives none.
    pub default_page_size: usize,
    /// Largest accepted page size.
    pub max_page_size: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            max_priority: 9,
            max_payload_bytes: 1024 * 1024,
            max_delay_ms: 24 * 60 * 60 * 1000,
            cancel_grace: None,
            max_conflict_retries: 8,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

/// What `start` found in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// `Created`/`Queued` tasks put back on the queue.
    pub requeued: usize,
    /// `Running` tasks marked failed.
    pub interrupted: usize,
}

/// Acknowledgement of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    /// Task the request targeted.
    pub task_id: TaskId,
    /// State after the request was handled.
    pub state: TaskState,
}

impl CancelAck {
    /// Whether the task is still running and was only signalled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == TaskState::Running
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Worker pool counters.
    pub pool: PoolStats,
    /// Entries waiting in the queue.
    pub queue_depth: usize,
}

/// The scheduling engine.
///
/// Built from explicit handles to its store, queue and pool; nothing here is
/// global. Call [`start`](Self::start) to recover persisted work and spawn the
/// workers.
pub struct Scheduler<S: TaskStore + ?Sized, E: TaskExecutor> {
    limits: SchedulerLimits,
    store: Arc<S>,
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool<E>>,
    query: QueryService<S>,
    reaper: GraceReaper,
    audit: Option<Arc<dyn AuditSink>>,
    started: AtomicBool,
}

impl<S: TaskStore + ?Sized, E: TaskExecutor> Scheduler<S, E> {
    /// Assemble a scheduler. Workers are not started.
    pub fn new(
        limits: SchedulerLimits,
        store: Arc<S>,
        queue: Arc<TaskQueue>,
        pool: Arc<WorkerPool<E>>,
    ) -> Self {
        let query = QueryService::new(
            Arc::clone(&store),
            limits.default_page_size,
            limits.max_page_size,
        );
        Self {
            reaper: GraceReaper::new(limits.cancel_grace),
            limits,
            store,
            queue,
            pool,
            query,
            audit: None,
            started: AtomicBool::new(false),
        }
    }

    /// Attach an audit sink receiving one event per state change.
    #[must_use]
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Recover persisted work, then start the workers and the grace reaper.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Unavailable`] if already started, if the store fails
    /// during recovery, or if the worker threads cannot be spawned.
    pub fn start(self: &Arc<Self>) -> Result<RecoveryReport, SchedulerError>
    where
        S: 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::Unavailable("scheduler already started".into()));
        }
        let report = self.recover()?;

        let strong: Arc<dyn Dispatch> = Arc::clone(self) as Arc<dyn Dispatch>;
        self.pool
            .start(&self.queue, &Arc::downgrade(&strong))
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;
        drop(strong);

        let weak: Weak<Self> = Arc::downgrade(self);
        self.reaper
            .start(Box::new(move |task_id| {
                if let Some(core) = weak.upgrade() {
                    core.expire_cancel(task_id);
                }
            }))
            .map_err(|e| SchedulerError::Unavailable(format!("failed to spawn reaper: {e}")))?;

        info!(
            requeued = report.requeued,
            interrupted = report.interrupted,
            "scheduler started"
        );
        Ok(report)
    }

    /// Submit a task. The task is visible to queries as soon as this returns.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::InvalidArgument`] for an empty, oversized or
    ///   out-of-range submission
    /// - [`SchedulerError::ResourceExhausted`] when the queue is full
    /// - [`SchedulerError::Unavailable`] when the store is down or the
    ///   scheduler is shutting down
    pub fn schedule(
        &self,
        payload: serde_json::Value,
        options: ScheduleOptions,
    ) -> Result<TaskId, SchedulerError> {
        self.validate(&payload, &options)?;
        if self.queue.is_closed() {
            return Err(SchedulerError::Unavailable("scheduler is shutting down".into()));
        }
        if self.queue.is_full() {
            warn!(depth = self.queue.len(), "admission rejected: queue full");
            return Err(SchedulerError::ResourceExhausted(format!(
                "queue is at its maximum depth of {}",
                self.queue.max_depth()
            )));
        }

        let id = self.store.next_id()?;
        let record = TaskRecord::new(id, payload, &options, now_ms());
        let entry = QueuedTask::from_record(&record);
        self.store.put(record)?;
        self.audit(id, None, TaskState::Created, None);

        match self.store.update(id, TaskState::Created, Transition::Enqueue) {
            Ok(_) => self.audit(id, Some(TaskState::Created), TaskState::Queued, None),
            Err(e) if e.is_conflict() => {
                // Cancelled between persist and admission.
                debug!(task_id = id, "task cancelled before admission");
                return Ok(id);
            }
            Err(e) => return Err(self.store_failure(e)),
        }

        match self.queue.enqueue(entry) {
            // Recovery running alongside already queued it.
            Ok(()) | Err(QueueError::Duplicate(_)) => {}
            Err(e) => {
                if matches!(e, QueueError::Closed) {
                    let cancel = Transition::Cancel { lease: None, at_ms: now_ms() };
                    if self.store.update(id, TaskState::Queued, cancel).is_ok() {
                        self.audit(id, Some(TaskState::Queued), TaskState::Cancelled, Some("shutdown".into()));
                    }
                }
                return Err(SchedulerError::Unavailable(e.to_string()));
            }
        }

        info!(
            task_id = id,
            priority = %options.priority,
            delay_ms = options.delay_ms,
            "task scheduled"
        );
        Ok(id)
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotFound`] for unknown ids.
    pub fn get(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.query.get(id)
    }

    /// List tasks. See [`QueryService::list`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidArgument`] for bad tokens, sizes or ranges.
    pub fn list(
        &self,
        filter: &TaskFilter,
        page_token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<TaskPage, SchedulerError> {
        self.query.list(filter, page_token, page_size)
    }

    /// Cancel a task.
    ///
    /// Pending tasks are removed from the queue and become `Cancelled`.
    /// Running tasks are flagged and their worker is signalled; the returned
    /// ack is then pending. Cancelling a finished task is a no-op.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NotFound`] for unknown ids,
    /// [`SchedulerError::Unavailable`] if the store fails or the task keeps
    /// changing state under the request.
    pub fn cancel(&self, id: TaskId) -> Result<CancelAck, SchedulerError> {
        for attempt in 0..=self.limits.max_conflict_retries {
            let record = self.store.get(id)?;
            if let Some(ack) = self.try_cancel(&record)? {
                return Ok(ack);
            }
            debug!(task_id = id, attempt, "cancel raced a transition, retrying");
        }
        Err(SchedulerError::Unavailable(format!(
            "cancel of task {id} kept conflicting with concurrent transitions"
        )))
    }

    /// One cancel attempt against the observed `record`; `None` means the
    /// record changed underneath and the caller should re-read it.
    fn try_cancel(&self, record: &TaskRecord) -> Result<Option<CancelAck>, SchedulerError> {
        let id = record.id;
        let from = record.state;
        let ack = |state| CancelAck { task_id: id, state };

        match from {
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled => Ok(Some(ack(from))),
            TaskState::Created | TaskState::Queued => {
                // If a worker already dequeued the entry, its claim loses the
                // CAS below and the task is never dispatched.
                self.queue.remove(id);
                let cancel = Transition::Cancel { lease: None, at_ms: now_ms() };
                match self.store.update(id, from, cancel) {
                    Ok(_) => {
                        self.audit(id, Some(from), TaskState::Cancelled, None);
                        info!(task_id = id, from = %from, "task cancelled");
                        Ok(Some(ack(TaskState::Cancelled)))
                    }
                    Err(e) if e.is_conflict() => Ok(None),
                    Err(e) => Err(self.store_failure(e)),
                }
            }
            TaskState::Running => {
                let first_request = !record.cancel_requested;
                if first_request {
                    match self.store.update(id, TaskState::Running, Transition::RequestCancel) {
                        Ok(_) => {}
                        Err(e) if e.is_conflict() => return Ok(None),
                        Err(e) => return Err(self.store_failure(e)),
                    }
                }
                let signalled = self.pool.signal_cancel(id);
                if first_request {
                    self.audit(
                        id,
                        Some(TaskState::Running),
                        TaskState::Running,
                        Some("cancel requested".into()),
                    );
                    self.reaper.watch(id);
                    info!(task_id = id, signalled, "cancellation requested for running task");
                }
                Ok(Some(ack(TaskState::Running)))
            }
        }
    }

    /// Administratively cancel a running task whose grace period expired.
    fn expire_cancel(&self, id: TaskId) {
        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(e) => {
                debug!(task_id = id, error = %e, "grace expiry skipped");
                return;
            }
        };
        if record.state != TaskState::Running || !record.cancel_requested {
            return;
        }
        let cancel = Transition::Cancel {
            lease: record.lease,
            at_ms: now_ms(),
        };
        match self.store.update(id, TaskState::Running, cancel) {
            Ok(_) => {
                PoolCounters::bump(&self.pool.counters().expired_cancellations);
                self.audit(
                    id,
                    Some(TaskState::Running),
                    TaskState::Cancelled,
                    Some("grace period expired".into()),
                );
                warn!(
                    task_id = id,
                    grace = ?self.reaper.grace(),
                    "executor ignored cancellation; task cancelled administratively, worker stays busy until it returns"
                );
            }
            Err(e) if e.is_conflict() => {
                debug!(task_id = id, "task finished before grace expiry");
            }
            Err(e) => {
                error!(task_id = id, error = %e, "grace expiry failed");
            }
        }
    }

    /// Scan non-terminal records left by a previous run.
    fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let filter = TaskFilter::with_states([
            TaskState::Created,
            TaskState::Queued,
            TaskState::Running,
        ]);
        let mut report = RecoveryReport::default();
        let mut after = None;

        loop {
            let page = self.store.list(
                &filter,
                PageRequest {
                    after,
                    limit: RECOVERY_PAGE,
                },
            )?;
            for record in page.tasks {
                let id = record.id;
                match record.state {
                    TaskState::Created => {
                        match self.store.update(id, TaskState::Created, Transition::Enqueue) {
                            Ok(updated) => {
                                self.audit(id, Some(TaskState::Created), TaskState::Queued, None);
                                self.requeue(&updated)?;
                                report.requeued += 1;
                            }
                            Err(e) if e.is_conflict() => {}
                            Err(e) => return Err(self.store_failure(e)),
                        }
                    }
                    TaskState::Queued => {
                        self.requeue(&record)?;
                        report.requeued += 1;
                    }
                    TaskState::Running => {
                        let fail = Transition::Fail {
                            lease: None,
                            error: INTERRUPTED_ERROR.into(),
                            at_ms: now_ms(),
                        };
                        match self.store.update(id, TaskState::Running, fail) {
                            Ok(_) => {
                                self.audit(
                                    id,
                                    Some(TaskState::Running),
                                    TaskState::Failed,
                                    Some(INTERRUPTED_ERROR.into()),
                                );
                                warn!(task_id = id, "task was running when the scheduler stopped; marked failed");
                                report.interrupted += 1;
                            }
                            Err(e) if e.is_conflict() => {}
                            Err(e) => return Err(self.store_failure(e)),
                        }
                    }
                    TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled => {}
                }
            }
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        Ok(report)
    }

    fn requeue(&self, record: &TaskRecord) -> Result<(), SchedulerError> {
        match self.queue.enqueue(QueuedTask::from_record(record)) {
            Ok(()) | Err(QueueError::Duplicate(_)) => Ok(()),
            Err(e) => Err(SchedulerError::Unavailable(e.to_string())),
        }
    }

    fn validate(
        &self,
        payload: &serde_json::Value,
        options: &ScheduleOptions,
    ) -> Result<(), SchedulerError> {
        let empty = match payload {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(fields) => fields.is_empty(),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => false,
        };
        if empty {
            return Err(SchedulerError::invalid("payload must not be empty"));
        }
        let size = serde_json::to_vec(payload)
            .map_err(|e| SchedulerError::invalid(format!("payload is not serializable: {e}")))?
            .len();
        if size > self.limits.max_payload_bytes {
            return Err(SchedulerError::invalid(format!(
                "payload is {size} bytes, limit is {}",
                self.limits.max_payload_bytes
            )));
        }
        if options.priority.value() > self.limits.max_priority {
            return Err(SchedulerError::invalid(format!(
                "priority {} is out of range 0..={}",
                options.priority, self.limits.max_priority
            )));
        }
        if options.delay_ms > self.limits.max_delay_ms {
            return Err(SchedulerError::invalid(format!(
                "delay_ms {} exceeds the maximum of {}",
                options.delay_ms, self.limits.max_delay_ms
            )));
        }
        Ok(())
    }

    fn audit(&self, id: TaskId, from: Option<TaskState>, to: TaskState, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            sink.record(build_task_event(id, from, to, detail));
        }
    }

    fn store_failure(&self, err: StoreError) -> SchedulerError {
        error!(error = %err, "task store failure");
        err.into()
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pool: self.pool.stats(),
            queue_depth: self.queue.len(),
        }
    }

    /// Stop accepting work, cancel running executions and join the workers.
    ///
    /// Tasks still queued stay `Queued` in the store and are picked up by the
    /// next `start` over the same store.
    pub fn shutdown(&self) {
        info!(queue_depth = self.queue.len(), "scheduler shutting down");
        self.queue.close();
        self.pool.shutdown();
        self.reaper.shutdown();
    }

    /// Active limits.
    #[must_use]
    pub const fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The dispatch queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// The worker pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<WorkerPool<E>> {
        &self.pool
    }
}

impl<S: TaskStore + ?Sized, E: TaskExecutor> Dispatch for Scheduler<S, E> {
    fn claim(&self, entry: QueuedTask, worker_id: usize) -> Option<Claim> {
        let id = entry.id;
        // The lease must exist before the task is visibly Running so a cancel
        // that observes Running can always signal it.
        let lease = self.pool.acquire_lease(id);
        if self.pool.is_shutdown() {
            // Left Queued for the next start.
            self.pool.release_lease(id, lease.id);
            debug!(task_id = id, worker_id, "pool shut down, entry not claimed");
            return None;
        }
        let start = Transition::Start {
            lease: lease.id,
            at_ms: now_ms(),
        };
        match self.store.update(id, TaskState::Queued, start) {
            Ok(record) => {
                self.audit(id, Some(TaskState::Queued), TaskState::Running, None);
                debug!(task_id = id, worker_id, priority = %record.priority, "task dispatched");
                Some(Claim {
                    task_id: id,
                    lease_id: lease.id,
                    priority: record.priority,
                    payload: record.payload,
                    token: lease.token,
                })
            }
            Err(e) => {
                self.pool.release_lease(id, lease.id);
                match e {
                    StoreError::Conflict { .. }
                    | StoreError::StaleLease(_)
                    | StoreError::IllegalTransition { .. } => {
                        debug!(task_id = id, worker_id, error = %e, "skipping entry no longer queued");
                    }
                    other => {
                        error!(task_id = id, worker_id, error = %other, "failed to claim task");
                    }
                }
                None
            }
        }
    }

    fn complete(&self, claim: Claim, outcome: ExecutionResult, worker_id: usize) {
        let id = claim.task_id;
        let at_ms = now_ms();
        let transition = match outcome {
            Ok(result) => Transition::Succeed {
                lease: claim.lease_id,
                result,
                at_ms,
            },
            Err(ExecutionError::Failed(error)) => Transition::Fail {
                lease: Some(claim.lease_id),
                error,
                at_ms,
            },
            Err(ExecutionError::Cancelled) => Transition::Cancel {
                lease: Some(claim.lease_id),
                at_ms,
            },
        };

        match self.store.update(id, TaskState::Running, transition) {
            Ok(record) => {
                let counters = self.pool.counters();
                match record.state {
                    TaskState::Succeeded => PoolCounters::bump(&counters.succeeded_tasks),
                    TaskState::Failed => PoolCounters::bump(&counters.failed_tasks),
                    _ => PoolCounters::bump(&counters.cancelled_tasks),
                }
                self.audit(id, Some(TaskState::Running), record.state, record.error.clone());
                info!(task_id = id, worker_id, state = %record.state, "task finished");
            }
            Err(e) if e.is_conflict() => {
                PoolCounters::bump(&self.pool.counters().stale_reports);
                debug!(task_id = id, worker_id, error = %e, "discarding stale worker report");
            }
            Err(e) => {
                error!(task_id = id, worker_id, error = %e, "failed to record task outcome");
            }
        }
        self.pool.release_lease(id, claim.lease_id);
    }
}

impl<S: TaskStore + ?Sized, E: TaskExecutor> Drop for Scheduler<S, E> {
    fn drop(&mut self) {
        // Signal only; explicit shutdown() joins.
        self.queue.close();
        self.pool.signal_shutdown();
    }
}
