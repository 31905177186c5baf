//! Tests for task listing and page tokens

use std::collections::HashSet;
use std::sync::Arc;

use prometheus_task_scheduler::core::{
    decode_page_token, encode_page_token, Cursor, QueryService, ScheduleOptions, SchedulerError,
    TaskFilter, TaskRecord, TaskState, TaskStore, Transition,
};
use prometheus_task_scheduler::infra::InMemoryTaskStore;
use serde_json::json;

fn seeded(n: u64) -> Arc<InMemoryTaskStore> {
    let store = Arc::new(InMemoryTaskStore::new());
    for id in 1..=n {
        // Several records share a creation time so the id tiebreak matters.
        let created = 10_000 + u128::from(id / 3);
        store
            .put(TaskRecord::new(id, json!({"n": id}), &ScheduleOptions::default(), created))
            .unwrap();
    }
    store
}

#[test]
fn test_paging_visits_every_record_once() {
    let store = seeded(23);
    let query = QueryService::new(Arc::clone(&store), 5, 10);

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = query.list(&TaskFilter::default(), token.as_deref(), Some(4)).unwrap();
        assert!(page.tasks.len() <= 4);
        seen.extend(page.tasks.iter().map(|t| t.id));
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, (1..=23).collect::<Vec<_>>());
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 23);
}

#[test]
fn test_inserts_during_paging_do_not_shift_pages() {
    let store = seeded(6);
    let query = QueryService::new(Arc::clone(&store), 3, 10);

    let first = query.list(&TaskFilter::default(), None, None).unwrap();
    assert_eq!(first.tasks.len(), 3);

    store
        .put(TaskRecord::new(7, json!(7), &ScheduleOptions::default(), 99_999))
        .unwrap();

    let second = query
        .list(&TaskFilter::default(), first.next_page_token.as_deref(), None)
        .unwrap();
    let ids: Vec<_> = second.tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![4, 5, 6]);
}

#[test]
fn test_state_filter() {
    let store = seeded(5);
    store.update(2, TaskState::Created, Transition::Enqueue).unwrap();
    store.update(4, TaskState::Created, Transition::Enqueue).unwrap();
    let query = QueryService::new(Arc::clone(&store), 10, 10);

    let page = query
        .list(&TaskFilter::with_states([TaskState::Queued]), None, None)
        .unwrap();
    let ids: Vec<_> = page.tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![2, 4]);
    assert!(page.next_page_token.is_none());
}

#[test]
fn test_time_range_bounds() {
    let query = QueryService::new(seeded(9), 10, 10);
    // Creation times: ids 1-2 at 10000, 3-5 at 10001, 6-8 at 10002, 9 at 10003.
    let filter = TaskFilter {
        created_after_ms: Some(10_001),
        created_before_ms: Some(10_002),
        ..TaskFilter::default()
    };
    let ids: Vec<_> = query
        .list(&filter, None, None)
        .unwrap()
        .tasks
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![3, 4, 5]);
}

#[test]
fn test_invalid_list_arguments() {
    let query = QueryService::new(seeded(2), 10, 10);
    let all = TaskFilter::default();

    assert!(matches!(query.list(&all, None, Some(0)), Err(SchedulerError::InvalidArgument(_))));
    assert!(matches!(query.list(&all, None, Some(11)), Err(SchedulerError::InvalidArgument(_))));
    assert!(matches!(
        query.list(&all, Some("not-a-token"), None),
        Err(SchedulerError::InvalidArgument(_))
    ));

    let inverted = TaskFilter {
        created_after_ms: Some(5),
        created_before_ms: Some(4),
        ..TaskFilter::default()
    };
    assert!(matches!(query.list(&inverted, None, None), Err(SchedulerError::InvalidArgument(_))));
}

#[test]
fn test_empty_token_means_first_page() {
    let query = QueryService::new(seeded(3), 10, 10);
    let page = query.list(&TaskFilter::default(), Some(""), None).unwrap();
    assert_eq!(page.tasks.len(), 3);
}

#[test]
fn test_get_unknown_is_not_found() {
    let query = QueryService::new(seeded(1), 10, 10);
    assert!(matches!(query.get(99), Err(SchedulerError::NotFound(99))));
}

#[test]
fn test_token_is_opaque_but_stable() {
    let cursor = Cursor { created_at_ms: 255, id: 16 };
    let token = encode_page_token(cursor);
    assert_eq!(decode_page_token(&token).unwrap(), cursor);
}
