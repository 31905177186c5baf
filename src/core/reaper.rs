//! Grace-period reaper for cancelled running tasks.
//!
//! When a running task is asked to cancel, the scheduler registers it here.
//! If the executor has not reported back once the grace period elapses, the
//! reaper calls back into the scheduler, which marks the task `Cancelled`
//! administratively. The worker thread keeps running until its executor
//! returns; its late report then loses the state race and is discarded.

use std::collections::BTreeSet;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::util::serde::TaskId;

enum Command {
    Watch(TaskId),
}

/// Callback invoked with each task whose grace period has expired.
pub(crate) type OnExpire = Box<dyn Fn(TaskId) + Send + 'static>;

pub(crate) struct GraceReaper {
    grace: Option<Duration>,
    tx: Mutex<Option<Sender<Command>>>,
    rx: Mutex<Option<Receiver<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GraceReaper {
    /// A reaper with the given grace; `None` disables it entirely.
    pub fn new(grace: Option<Duration>) -> Self {
        let (tx, rx) = match grace {
            Some(_) => {
                let (tx, rx) = unbounded();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        Self {
            grace,
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            handle: Mutex::new(None),
        }
    }

    pub const fn grace(&self) -> Option<Duration> {
        self.grace
    }

    /// Spawn the reaper thread. A second call is a no-op.
    pub fn start(&self, on_expire: OnExpire) -> std::io::Result<()> {
        let (Some(grace), Some(rx)) = (self.grace, self.rx.lock().take()) else {
            return Ok(());
        };
        let handle = thread::Builder::new()
            .name("sched-reaper".into())
            .spawn(move || run(&rx, grace, &on_expire))?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Start the grace clock for `task_id`.
    pub fn watch(&self, task_id: TaskId) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Command::Watch(task_id));
        }
    }

    /// Stop the reaper thread and wait for it.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("reaper thread panicked");
            }
        }
    }
}

fn run(rx: &Receiver<Command>, grace: Duration, on_expire: &OnExpire) {
    debug!(?grace, "reaper thread started");
    let mut deadlines: BTreeSet<(Instant, TaskId)> = BTreeSet::new();

    loop {
        let received = match deadlines.first() {
            Some(&(deadline, _)) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(Command::Watch(task_id)) => {
                deadlines.insert((Instant::now() + grace, task_id));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while let Some(&(deadline, task_id)) = deadlines.first() {
            if deadline > now {
                break;
            }
            deadlines.pop_first();
            on_expire(task_id);
        }
    }
    debug!(pending = deadlines.len(), "reaper thread exiting");
}
