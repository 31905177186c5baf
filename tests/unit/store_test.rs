//! Tests for task store backends

use std::sync::Arc;
use std::thread;

use prometheus_task_scheduler::core::{
    PageRequest, ScheduleOptions, StoreError, TaskFilter, TaskRecord, TaskState, TaskStore,
    Transition,
};
use prometheus_task_scheduler::infra::{InMemoryTaskStore, JsonlTaskStore};
use serde_json::json;
use uuid::Uuid;

fn new_record(store: &dyn TaskStore) -> TaskRecord {
    let id = store.next_id().unwrap();
    let record = TaskRecord::new(id, json!({"op": "echo", "value": id}), &ScheduleOptions::default(), 1_000);
    store.put(record.clone()).unwrap();
    record
}

fn exercise_lifecycle(store: &dyn TaskStore) {
    let record = new_record(store);
    let id = record.id;
    let lease = Uuid::new_v4();

    store.update(id, TaskState::Created, Transition::Enqueue).unwrap();
    let running = store
        .update(id, TaskState::Queued, Transition::Start { lease, at_ms: 1_010 })
        .unwrap();
    assert_eq!(running.lease, Some(lease));
    assert_eq!(running.started_at_ms, Some(1_010));

    // A report carrying somebody else's lease is stale.
    let stale = store.update(
        id,
        TaskState::Running,
        Transition::Succeed { lease: Uuid::new_v4(), result: json!(1), at_ms: 1_020 },
    );
    assert_eq!(stale.unwrap_err(), StoreError::StaleLease(id));

    let done = store
        .update(
            id,
            TaskState::Running,
            Transition::Succeed { lease, result: json!("ok"), at_ms: 1_020 },
        )
        .unwrap();
    assert_eq!(done.state, TaskState::Succeeded);
    assert_eq!(done.result, Some(json!("ok")));
    assert_eq!(done.lease, None);

    // Terminal records never move again.
    let again = store.update(id, TaskState::Running, Transition::Cancel { lease: None, at_ms: 1_030 });
    assert!(again.unwrap_err().is_conflict());
    assert_eq!(store.get(id).unwrap().state, TaskState::Succeeded);
}

#[test]
fn test_in_memory_lifecycle() {
    exercise_lifecycle(&InMemoryTaskStore::new());
}

#[test]
fn test_jsonl_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    exercise_lifecycle(&JsonlTaskStore::open(dir.path()).unwrap());
}

#[test]
fn test_duplicate_put_rejected() {
    let store = InMemoryTaskStore::new();
    let record = new_record(&store);
    assert_eq!(store.put(record.clone()), Err(StoreError::AlreadyExists(record.id)));
}

#[test]
fn test_unknown_ids() {
    let store = InMemoryTaskStore::new();
    assert_eq!(store.get(5).unwrap_err(), StoreError::NotFound(5));
    assert_eq!(
        store.update(5, TaskState::Created, Transition::Enqueue).unwrap_err(),
        StoreError::NotFound(5)
    );
}

#[test]
fn test_concurrent_cas_has_one_winner() {
    let store = Arc::new(InMemoryTaskStore::new());
    let id = new_record(store.as_ref()).id;
    store.update(id, TaskState::Created, Transition::Enqueue).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let transition = if i % 2 == 0 {
                    Transition::Start { lease: Uuid::new_v4(), at_ms: 2_000 }
                } else {
                    Transition::Cancel { lease: None, at_ms: 2_000 }
                };
                store.update(id, TaskState::Queued, transition).is_ok()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_ids_are_unique_across_threads() {
    let store = Arc::new(InMemoryTaskStore::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || (0..100).map(|_| store.next_id().unwrap()).collect::<Vec<_>>())
        })
        .collect();

    let mut ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 400);
}

#[test]
fn test_list_limit_and_next_cursor() {
    let store = InMemoryTaskStore::new();
    for _ in 0..5 {
        new_record(&store);
    }
    let page = store
        .list(&TaskFilter::default(), PageRequest { after: None, limit: 2 })
        .unwrap();
    assert_eq!(page.tasks.len(), 2);
    let next = page.next.unwrap();
    assert_eq!(next.id, page.tasks[1].id);

    let rest = store
        .list(&TaskFilter::default(), PageRequest { after: Some(next), limit: 10 })
        .unwrap();
    assert_eq!(rest.tasks.len(), 3);
    assert!(rest.next.is_none());
}
