//! In-memory task store.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::error::StoreError;
use crate::core::store::{apply_transition, Cursor, Page, PageRequest, TaskFilter, TaskStore};
use crate::core::task::{TaskRecord, TaskState, Transition};
use crate::util::serde::TaskId;

#[derive(Default)]
struct Records {
    by_id: HashMap<TaskId, TaskRecord>,
    /// Listing order; `created_at_ms` never changes so entries are never moved.
    order: BTreeSet<Cursor>,
}

/// Task store keeping every record in process memory.
///
/// Reads take a shared lock; `put`/`update` take the write lock for the
/// duration of the compare-and-swap.
pub struct InMemoryTaskStore {
    records: RwLock<Records>,
    next_id: AtomicU64,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskStore {
    /// Create an empty store. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().by_id.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite a record without any state check, bumping id
    /// allocation past it. Used when replaying a persisted log.
    pub(crate) fn restore(&self, record: TaskRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        let mut records = self.records.write();
        records.order.insert(Cursor::of(&record));
        records.by_id.insert(record.id, record);
    }

    /// Every stored record in listing order.
    pub(crate) fn snapshot(&self) -> Vec<TaskRecord> {
        let records = self.records.read();
        records
            .order
            .iter()
            .filter_map(|cursor| records.by_id.get(&cursor.id).cloned())
            .collect()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn next_id(&self) -> Result<TaskId, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.by_id.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        records.order.insert(Cursor::of(&record));
        records.by_id.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.records
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn update(
        &self,
        id: TaskId,
        expected: TaskState,
        transition: Transition,
    ) -> Result<TaskRecord, StoreError> {
        let mut records = self.records.write();
        let current = records.by_id.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let next = apply_transition(current, expected, transition)?;
        *current = next.clone();
        Ok(next)
    }

    fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<Page, StoreError> {
        let records = self.records.read();
        let lower = page.after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut tasks = Vec::with_capacity(page.limit.min(256));
        let mut next = None;
        for cursor in records.order.range((lower, Bound::Unbounded)) {
            if filter
                .created_before_ms
                .is_some_and(|before| cursor.created_at_ms >= before)
            {
                break;
            }
            let Some(record) = records.by_id.get(&cursor.id) else {
                continue;
            };
            if !filter.matches(record) {
                continue;
            }
            if tasks.len() == page.limit {
                next = tasks.last().map(Cursor::of);
                break;
            }
            tasks.push(record.clone());
        }
        Ok(Page { tasks, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::ScheduleOptions;
    use serde_json::json;

    fn record(id: TaskId, created: u128) -> TaskRecord {
        TaskRecord::new(id, json!({"n": id}), &ScheduleOptions::default(), created)
    }

    #[test]
    fn test_put_get() {
        let store = InMemoryTaskStore::new();
        let id = store.next_id().unwrap();
        assert_eq!(id, 1);
        store.put(record(id, 10)).unwrap();
        assert_eq!(store.get(id).unwrap().state, TaskState::Created);
        assert_eq!(store.get(99), Err(StoreError::NotFound(99)));
        assert_eq!(store.put(record(id, 11)), Err(StoreError::AlreadyExists(id)));
    }

    #[test]
    fn test_update_is_cas() {
        let store = InMemoryTaskStore::new();
        store.put(record(1, 10)).unwrap();

        let updated = store.update(1, TaskState::Created, Transition::Enqueue).unwrap();
        assert_eq!(updated.state, TaskState::Queued);

        let err = store
            .update(1, TaskState::Created, Transition::Enqueue)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(1).unwrap().state, TaskState::Queued);
    }

    #[test]
    fn test_list_pages() {
        let store = InMemoryTaskStore::new();
        // Same timestamp for 2 and 3 so the id breaks the tie.
        for (id, created) in [(3, 20), (1, 10), (2, 20), (4, 30), (5, 40)] {
            store.put(record(id, created)).unwrap();
        }

        let first = store
            .list(&TaskFilter::default(), PageRequest { after: None, limit: 2 })
            .unwrap();
        let ids: Vec<_> = first.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(first.next, Some(Cursor { created_at_ms: 20, id: 2 }));

        let second = store
            .list(&TaskFilter::default(), PageRequest { after: first.next, limit: 2 })
            .unwrap();
        let ids: Vec<_> = second.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4]);

        let last = store
            .list(&TaskFilter::default(), PageRequest { after: second.next, limit: 2 })
            .unwrap();
        let ids: Vec<_> = last.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5]);
        assert_eq!(last.next, None);
    }

    #[test]
    fn test_list_exact_page_has_no_next() {
        let store = InMemoryTaskStore::new();
        store.put(record(1, 10)).unwrap();
        store.put(record(2, 20)).unwrap();
        let page = store
            .list(&TaskFilter::default(), PageRequest { after: None, limit: 2 })
            .unwrap();
        assert_eq!(page.tasks.len(), 2);
        assert_eq!(page.next, None);
    }

    #[test]
    fn test_list_filters() {
        let store = InMemoryTaskStore::new();
        for id in 1..=6 {
            store.put(record(id, u128::from(id) * 10)).unwrap();
        }
        store.update(2, TaskState::Created, Transition::Enqueue).unwrap();
        store.update(4, TaskState::Created, Transition::Enqueue).unwrap();

        let filter = TaskFilter {
            states: vec![TaskState::Queued],
            ..TaskFilter::default()
        };
        let page = store.list(&filter, PageRequest { after: None, limit: 10 }).unwrap();
        let ids: Vec<_> = page.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 4]);

        let filter = TaskFilter {
            created_after_ms: Some(30),
            created_before_ms: Some(50),
            ..TaskFilter::default()
        };
        let page = store.list(&filter, PageRequest { after: None, limit: 10 }).unwrap();
        let ids: Vec<_> = page.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_restore_bumps_ids() {
        let store = InMemoryTaskStore::new();
        store.restore(record(41, 5));
        assert_eq!(store.next_id().unwrap(), 42);
        assert_eq!(store.snapshot().len(), 1);
    }
}
