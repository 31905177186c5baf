//! Native implementation of `WorkerPool` using OS threads.
//!
//! Each worker owns a single-threaded tokio runtime and blocks in
//! `TaskQueue::dequeue` until work arrives, the queue closes, or the pool's
//! shutdown token fires. No polling.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{ExecutionContext, ExecutionError, TaskExecutor};
use crate::core::queue::TaskQueue;
use crate::util::serde::TaskId;

use super::{Dispatch, Lease, LeaseTable, PoolCounters, PoolError, PoolStats};

/// Bounded set of worker threads running a [`TaskExecutor`].
///
/// The pool is created idle; the scheduler starts it once recovery has
/// re-enqueued surviving work.
pub struct WorkerPool<E: TaskExecutor> {
    config: WorkerPoolConfig,
    executor: E,
    leases: LeaseTable,
    counters: Arc<PoolCounters>,
    /// Parent of every lease token; cancelling it stops idle and busy workers.
    shutdown: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: TaskExecutor> WorkerPool<E> {
    /// Create an idle pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Ok(Self {
            config,
            executor,
            leases: LeaseTable::default(),
            counters: Arc::new(PoolCounters::default()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Spawn the worker threads.
    pub(crate) fn start(
        &self,
        queue: &Arc<TaskQueue>,
        dispatch: &Weak<dyn Dispatch>,
    ) -> Result<(), PoolError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PoolError::AlreadyStarted);
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.worker_count {
            let worker = spawn_worker(
                worker_id,
                Arc::clone(queue),
                Weak::clone(dispatch),
                Arc::clone(&self.counters),
                self.shutdown.clone(),
                self.executor.clone(),
                self.config.thread_stack_size,
            );
            match worker {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(workers);
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        info!(
            worker_count = self.config.worker_count,
            "worker pool started with dedicated OS threads"
        );
        Ok(())
    }

    pub(crate) fn acquire_lease(&self, task_id: TaskId) -> Lease {
        self.leases.acquire(task_id, &self.shutdown)
    }

    pub(crate) fn release_lease(&self, task_id: TaskId, lease_id: uuid::Uuid) {
        self.leases.release(task_id, lease_id);
    }

    /// Fire the cancellation token of the worker running `task_id`.
    ///
    /// Returns `false` if no worker holds a lease on the task.
    pub fn signal_cancel(&self, task_id: TaskId) -> bool {
        let signalled = self.leases.signal(task_id);
        if signalled {
            debug!(task_id, "cancellation signalled to worker");
        }
        signalled
    }

    pub(crate) fn counters(&self) -> &PoolCounters {
        &self.counters
    }

    /// Snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Number of leases currently held.
    #[must_use]
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Signal shutdown without joining the workers.
    pub(crate) fn signal_shutdown(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    /// Shut down the pool, joining each worker with a timeout.
    ///
    /// Running executions see their cancellation token fire. Workers that
    /// don't exit within `shutdown_timeout_ms` are detached.
    pub fn shutdown(&self) {
        if !self.signal_shutdown() {
            return;
        }
        info!("shutting down worker pool");

        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let worker_count = workers.len();

        for (worker_id, worker) in workers.into_iter().enumerate() {
            // Join on a helper thread so a stuck executor cannot hang shutdown.
            let (tx, rx) = bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(worker_id, "worker joined");
                    let _ = joiner.join();
                }
                Ok(false) => {
                    warn!(worker_id, "worker panicked");
                    let _ = joiner.join();
                }
                Err(_) => {
                    warn!(worker_id, "worker did not exit within timeout, detaching");
                }
            }
        }

        info!(worker_count, "worker pool shut down");
    }
}

impl<E: TaskExecutor> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        // Explicit shutdown() joins; dropping only signals.
        if self.signal_shutdown() {
            debug!("worker pool dropped without explicit shutdown, workers will be detached");
        }
    }
}

fn spawn_worker<E: TaskExecutor>(
    worker_id: usize,
    queue: Arc<TaskQueue>,
    dispatch: Weak<dyn Dispatch>,
    counters: Arc<PoolCounters>,
    shutdown: CancellationToken,
    executor: E,
    stack_size: usize,
) -> Result<JoinHandle<()>, PoolError> {
    thread::Builder::new()
        .name(format!("sched-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            loop {
                let entry = match rt.block_on(queue.dequeue(&shutdown)) {
                    Ok(entry) => entry,
                    Err(reason) => {
                        debug!(worker_id, %reason, "worker leaving dequeue loop");
                        break;
                    }
                };

                if shutdown.is_cancelled() {
                    // The record stays Queued for the next start.
                    debug!(worker_id, task_id = entry.id, "shutdown raced dequeue, entry left queued");
                    break;
                }
                let Some(core) = dispatch.upgrade() else {
                    debug!(worker_id, "scheduler dropped, worker exiting");
                    break;
                };
                let Some(claim) = core.claim(entry, worker_id) else {
                    continue;
                };

                counters.active_tasks.fetch_add(1, Ordering::Relaxed);
                PoolCounters::bump(&counters.dispatched_tasks);

                let outcome = if claim.token.is_cancelled() {
                    // Cancelled between dequeue and claim.
                    Err(ExecutionError::Cancelled)
                } else {
                    let ctx = ExecutionContext::new(
                        claim.task_id,
                        claim.lease_id,
                        claim.priority,
                        claim.token.clone(),
                    );
                    let run = executor.execute(claim.payload.clone(), ctx);
                    catch_unwind(AssertUnwindSafe(|| rt.block_on(run))).unwrap_or_else(|_| {
                        error!(worker_id, task_id = claim.task_id, "executor panicked");
                        Err(ExecutionError::failed("executor panicked"))
                    })
                };

                counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
                core.complete(claim, outcome, worker_id);
            }

            debug!(worker_id, "worker thread exiting");
        })
        .map_err(|e| PoolError::Internal(format!("failed to spawn worker {worker_id}: {e}")))
}
