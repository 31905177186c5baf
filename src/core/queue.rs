//! Admission queue feeding ready tasks to workers.
//!
//! Ordering is highest priority first, then `created_at_ms` ascending, then id.
//! Delayed entries wait in a separate index keyed on their `not_before_ms` and
//! are promoted to the ready set once due.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::task::TaskRecord;
use crate::util::clock::{millis_until, now_ms};
use crate::util::serde::{Priority, TaskId};

/// Errors returned by [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue was closed for shutdown.
    #[error("queue closed")]
    Closed,
    /// The caller's cancellation token fired while waiting.
    #[error("dequeue cancelled")]
    Cancelled,
    /// The task is already queued.
    #[error("task {0} already queued")]
    Duplicate(TaskId),
}

/// Queue entry: the ordering inputs of a task, not the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedTask {
    /// Task id.
    pub id: TaskId,
    /// Dispatch priority.
    pub priority: Priority,
    /// FIFO tie-breaker.
    pub created_at_ms: u128,
    /// Not dispatchable before this time.
    pub not_before_ms: Option<u128>,
}

impl QueuedTask {
    /// Entry for a stored record.
    #[must_use]
    pub const fn from_record(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            priority: record.priority,
            created_at_ms: record.created_at_ms,
            not_before_ms: record.not_before_ms,
        }
    }

    const fn ready_key(&self) -> ReadyKey {
        ReadyKey(Reverse(self.priority), self.created_at_ms, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey(Reverse<Priority>, u128, TaskId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayKey(u128, TaskId);

#[derive(Debug, Clone, Copy)]
enum Slot {
    Ready(ReadyKey),
    Delayed(DelayKey),
}

#[derive(Default)]
struct QueueState {
    ready: BTreeMap<ReadyKey, QueuedTask>,
    delayed: BTreeMap<DelayKey, QueuedTask>,
    index: HashMap<TaskId, Slot>,
    closed: bool,
}

impl QueueState {
    fn insert_ready(&mut self, task: QueuedTask) {
        let key = task.ready_key();
        self.index.insert(task.id, Slot::Ready(key));
        self.ready.insert(key, task);
    }

    /// Move every delayed entry due at `now` into the ready set.
    fn promote(&mut self, now: u128) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            self.insert_ready(task);
        }
    }

    fn pop_ready(&mut self) -> Option<QueuedTask> {
        let (_, task) = self.ready.pop_first()?;
        self.index.remove(&task.id);
        Some(task)
    }

    fn next_due(&self) -> Option<u128> {
        self.delayed.first_key_value().map(|(key, _)| key.0)
    }
}

/// Priority queue with blocking, cancellable dequeue.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_depth: usize,
}

impl TaskQueue {
    /// Create a queue that reports full at `max_depth` entries.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_depth,
        }
    }

    /// Add a task and wake one waiting worker.
    ///
    /// Depth is not enforced here; callers check [`is_full`](Self::is_full)
    /// before admitting new work so recovery can always re-enqueue.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] after [`close`](Self::close),
    /// [`QueueError::Duplicate`] if the id is already queued.
    pub fn enqueue(&self, task: QueuedTask) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.index.contains_key(&task.id) {
                return Err(QueueError::Duplicate(task.id));
            }
            match task.not_before_ms {
                Some(due) if due > now_ms() => {
                    let key = DelayKey(due, task.id);
                    state.index.insert(task.id, Slot::Delayed(key));
                    state.delayed.insert(key, task);
                }
                _ => state.insert_ready(task),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next dispatchable task.
    ///
    /// # Errors
    ///
    /// [`QueueError::Cancelled`] when `cancel` fires, [`QueueError::Closed`]
    /// once the queue is closed.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<QueuedTask, QueueError> {
        loop {
            // Register interest before inspecting state so an enqueue between
            // the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                state.promote(now_ms());
                if let Some(task) = state.pop_ready() {
                    return Ok(task);
                }
                state.next_due()
            };

            let wait = next_due.map(|due| Duration::from_millis(millis_until(due, now_ms())));
            tokio::select! {
                () = cancel.cancelled() => return Err(QueueError::Cancelled),
                () = &mut notified => {}
                () = sleep_or_pending(wait) => {}
            }
        }
    }

    /// Pop the next dispatchable task without waiting.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock();
        state.promote(now_ms());
        state.pop_ready()
    }

    /// Remove a task that has not been dequeued yet.
    ///
    /// Returns `false` if the task is not in the queue (already dequeued or
    /// never enqueued).
    pub fn remove(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        match state.index.remove(&id) {
            Some(Slot::Ready(key)) => state.ready.remove(&key).is_some(),
            Some(Slot::Delayed(key)) => state.delayed.remove(&key).is_some(),
            None => false,
        }
    }

    /// Whether `id` is waiting in the queue.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.state.lock().index.contains_key(&id)
    }

    /// Entries waiting, ready or delayed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Whether no entries are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured admission depth.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Whether admission should be refused.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_depth
    }

    /// Close the queue and wake every waiter. Entries still queued stay
    /// queued; they are not handed out anymore.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

async fn sleep_or_pending(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}
