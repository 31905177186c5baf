//! Storage contract for task records.
//!
//! The store is the single source of truth for task state. Every mutation is a
//! compare-and-swap keyed on the state the caller expects the record to be in,
//! so concurrent writers (workers, cancellation, the grace reaper) can race
//! without a global lock and exactly one of them wins.

use serde::{Deserialize, Serialize};

use crate::core::error::StoreError;
use crate::core::task::{TaskRecord, TaskState, Transition};
use crate::util::serde::TaskId;

/// Predicate applied by [`TaskStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    /// Accepted states; empty accepts all.
    pub states: Vec<TaskState>,
    /// Inclusive lower bound on `created_at_ms`.
    pub created_after_ms: Option<u128>,
    /// Exclusive upper bound on `created_at_ms`.
    pub created_before_ms: Option<u128>,
}

impl TaskFilter {
    /// Filter that only accepts `states`.
    #[must_use]
    pub fn with_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Whether `record` passes this filter.
    #[must_use]
    pub fn matches(&self, record: &TaskRecord) -> bool {
        (self.states.is_empty() || self.states.contains(&record.state))
            && self
                .created_after_ms
                .is_none_or(|after| record.created_at_ms >= after)
            && self
                .created_before_ms
                .is_none_or(|before| record.created_at_ms < before)
    }
}

/// Position in the `(created_at_ms, id)` listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor {
    /// Creation time of the last record returned.
    pub created_at_ms: u128,
    /// Id of the last record returned.
    pub id: TaskId,
}

impl Cursor {
    /// Cursor pointing at `record`.
    #[must_use]
    pub const fn of(record: &TaskRecord) -> Self {
        Self {
            created_at_ms: record.created_at_ms,
            id: record.id,
        }
    }
}

/// One page request against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Resume strictly after this position.
    pub after: Option<Cursor>,
    /// Maximum number of records to return.
    pub limit: usize,
}

/// One page of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Matching records in listing order.
    pub tasks: Vec<TaskRecord>,
    /// Set when more matching records may follow.
    pub next: Option<Cursor>,
}

/// Backend storing task records.
///
/// Implementations must make [`update`](Self::update) atomic with respect to
/// every other call on the same id.
pub trait TaskStore: Send + Sync {
    /// Allocate a fresh, never reused task id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the backend is down.
    fn next_id(&self) -> Result<TaskId, StoreError>;

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the id is taken.
    fn put(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if absent.
    fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    /// Apply `transition` if the record is currently in `expected`.
    ///
    /// Returns the record as stored after the update.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`], [`StoreError::StaleLease`] or
    /// [`StoreError::IllegalTransition`] when the CAS does not apply.
    fn update(
        &self,
        id: TaskId,
        expected: TaskState,
        transition: Transition,
    ) -> Result<TaskRecord, StoreError>;

    /// Records matching `filter` ordered by `(created_at_ms, id)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] when the backend is down.
    fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page, StoreError>;
}

/// Apply a transition to a copy of `current`; the original is left untouched
/// on error.
pub(crate) fn apply_transition(
    current: &TaskRecord,
    expected: TaskState,
    transition: Transition,
) -> Result<TaskRecord, StoreError> {
    let mut next = current.clone();
    transition.apply(&mut next, expected)?;
    Ok(next)
}
