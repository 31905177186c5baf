//! File-backed task store using an append-only JSON lines log.
//!
//! Every `put`/`update` appends the full record after the change and syncs it
//! to disk before returning; on open the log is replayed and the last line
//! for each id wins. Records are served from an [`InMemoryTaskStore`] mirror.

use std::fs::{self, create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::core::error::StoreError;
use crate::core::store::{Page, PageRequest, TaskFilter, TaskStore};
use crate::core::task::{TaskRecord, TaskState, Transition};
use crate::infra::store::memory::InMemoryTaskStore;
use crate::util::serde::TaskId;

const LOG_FILE: &str = "tasks.jsonl";

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Durable task store backed by `<dir>/tasks.jsonl`.
pub struct JsonlTaskStore {
    path: PathBuf,
    mirror: InMemoryTaskStore,
    /// Serializes writers so the log order matches the order of CAS wins.
    file: Mutex<File>,
    failed: AtomicBool,
}

impl JsonlTaskStore {
    /// Open (or create) the store in `dir`, replaying any existing log.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the directory or log cannot be read, or
    /// a log line does not parse.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(backend)?;
        let path = dir.join(LOG_FILE);

        let mirror = InMemoryTaskStore::new();
        if path.exists() {
            replay(&path, &mirror)?;
        }
        info!(path = %path.display(), records = mirror.len(), "opened task log");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(backend)?;
        Ok(Self {
            path,
            mirror,
            file: Mutex::new(file),
            failed: AtomicBool::new(false),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log with one line per record.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the rewrite fails; the store is then
    /// marked unavailable.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.check()?;
        let mut file = self.file.lock();
        match self.rewrite() {
            Ok(reopened) => {
                *file = reopened;
                Ok(())
            }
            Err(e) => Err(self.mark_failed(e)),
        }
    }

    fn rewrite(&self) -> Result<File, StoreError> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut writer = BufWriter::new(File::create(&tmp).map_err(backend)?);
        for record in self.mirror.snapshot() {
            let line = serde_json::to_string(&record).map_err(backend)?;
            writeln!(writer, "{line}").map_err(backend)?;
        }
        writer
            .into_inner()
            .map_err(|e| backend(e.error()))?
            .sync_all()
            .map_err(backend)?;
        fs::rename(&tmp, &self.path).map_err(backend)?;
        OpenOptions::new().append(true).open(&self.path).map_err(backend)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(format!(
                "task log {} failed earlier",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn mark_failed(&self, err: StoreError) -> StoreError {
        error!(path = %self.path.display(), error = %err, "task log write failed; store is now unavailable");
        self.failed.store(true, Ordering::Release);
        err
    }

    fn append(&self, file: &mut File, record: &TaskRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record).map_err(backend)?;
        writeln!(file, "{line}")
            .and_then(|()| file.sync_data())
            .map_err(|e| self.mark_failed(backend(e)))
    }
}

/// Load every record in the log into `mirror`.
///
/// An unparseable final line is a write torn by a crash: it is dropped and
/// the file truncated back to the last complete record. A bad line anywhere
/// else is corruption.
fn replay(path: &Path, mirror: &InMemoryTaskStore) -> Result<(), StoreError> {
    let bytes = fs::read(path).map_err(backend)?;
    let mut start = 0;
    for (lineno, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_start = start;
        start += line.len() + 1;
        if line.trim_ascii().is_empty() {
            continue;
        }
        match serde_json::from_slice::<TaskRecord>(line) {
            Ok(record) => mirror.restore(record),
            Err(e) if bytes[line_start + line.len()..].trim_ascii().is_empty() => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "dropping torn record at end of task log"
                );
                let file = OpenOptions::new().write(true).open(path).map_err(backend)?;
                file.set_len(u64::try_from(line_start).map_err(backend)?)
                    .map_err(backend)?;
                file.sync_all().map_err(backend)?;
                break;
            }
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "{}:{}: {e}",
                    path.display(),
                    lineno + 1
                )));
            }
        }
    }
    Ok(())
}

impl TaskStore for JsonlTaskStore {
    fn next_id(&self) -> Result<TaskId, StoreError> {
        self.check()?;
        self.mirror.next_id()
    }

    fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut file = self.file.lock();
        self.check()?;
        self.mirror.put(record.clone())?;
        self.append(&mut file, &record)
    }

    fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.check()?;
        self.mirror.get(id)
    }

    fn update(
        &self,
        id: TaskId,
        expected: TaskState,
        transition: Transition,
    ) -> Result<TaskRecord, StoreError> {
        self.check()?;
        let mut file = self.file.lock();
        self.check()?;
        let record = self.mirror.update(id, expected, transition)?;
        self.append(&mut file, &record)?;
        Ok(record)
    }

    fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page, StoreError> {
        self.check()?;
        self.mirror.list(filter, page)
    }
}
