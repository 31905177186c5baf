//! Fixed pool of worker threads executing dispatched tasks.
//!
//! Each worker is a dedicated OS thread driving its own single-threaded tokio
//! runtime. Workers block on [`TaskQueue::dequeue`](crate::core::queue::TaskQueue::dequeue),
//! ask the scheduler core to claim the entry, run the executor, and hand the
//! outcome back. The pool never touches the task store itself.
//!
//! Execution ownership is tracked in a [`LeaseTable`]: a claim grants a fresh
//! lease id plus a cancellation token that is a child of the pool's shutdown
//! token, so both per-task cancellation and pool shutdown reach the executor.

mod native;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::executor::ExecutionResult;
use crate::core::queue::QueuedTask;
use crate::util::serde::{Priority, TaskId};

pub use native::WorkerPool;

/// Errors that can occur when using a [`WorkerPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// `start` was called twice.
    #[error("worker pool already started")]
    AlreadyStarted,
    /// The pool has been shut down.
    #[error("pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal error (thread spawn failure, runtime build failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Executions currently in progress.
    pub active_tasks: u64,
    /// Tasks handed to an executor.
    pub dispatched_tasks: u64,
    /// Tasks that ended `Succeeded`.
    pub succeeded_tasks: u64,
    /// Tasks that ended `Failed`.
    pub failed_tasks: u64,
    /// Tasks that ended `Cancelled` while running.
    pub cancelled_tasks: u64,
    /// Worker reports discarded because they lost a state race.
    pub stale_reports: u64,
    /// Running tasks cancelled administratively after the grace period.
    pub expired_cancellations: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub dispatched_tasks: AtomicU64,
    pub succeeded_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
    pub stale_reports: AtomicU64,
    pub expired_cancellations: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            dispatched_tasks: self.dispatched_tasks.load(Ordering::Relaxed),
            succeeded_tasks: self.succeeded_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled_tasks.load(Ordering::Relaxed),
            stale_reports: self.stale_reports.load(Ordering::Relaxed),
            expired_cancellations: self.expired_cancellations.load(Ordering::Relaxed),
        }
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Exclusive execution right on one task.
#[derive(Debug, Clone)]
pub(crate) struct Lease {
    pub id: Uuid,
    pub token: CancellationToken,
}

/// Leases currently held by workers, keyed by task.
#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    leases: RwLock<HashMap<TaskId, Lease>>,
}

impl LeaseTable {
    /// Grant a new lease on `task_id`, replacing any previous one.
    pub fn acquire(&self, task_id: TaskId, parent: &CancellationToken) -> Lease {
        let lease = Lease {
            id: Uuid::new_v4(),
            token: parent.child_token(),
        };
        self.leases.write().insert(task_id, lease.clone());
        lease
    }

    /// Drop the lease if `lease_id` still owns it.
    pub fn release(&self, task_id: TaskId, lease_id: Uuid) {
        let mut leases = self.leases.write();
        if leases.get(&task_id).is_some_and(|l| l.id == lease_id) {
            leases.remove(&task_id);
        }
    }

    /// Fire the cancellation token of the lease on `task_id`, if any.
    pub fn signal(&self, task_id: TaskId) -> bool {
        self.leases.read().get(&task_id).is_some_and(|lease| {
            lease.token.cancel();
            true
        })
    }

    pub fn len(&self) -> usize {
        self.leases.read().len()
    }
}

/// A task claimed for execution by one worker.
#[derive(Debug, Clone)]
pub(crate) struct Claim {
    pub task_id: TaskId,
    pub lease_id: Uuid,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub token: CancellationToken,
}

/// The scheduler-side half of the worker loop.
///
/// Workers hold this as a `Weak` so dropping the scheduler stops them.
pub(crate) trait Dispatch: Send + Sync {
    /// Move a dequeued entry to `Running`; `None` means skip it.
    fn claim(&self, entry: QueuedTask, worker_id: usize) -> Option<Claim>;

    /// Record the outcome of a claimed execution.
    fn complete(&self, claim: Claim, outcome: ExecutionResult, worker_id: usize);
}
