//! Integration tests for the grouped container store.

use batchq::{BatchableTask, GroupedStore, ProcessOutcome, TaskContainer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DummyTask {
    value: u32,
}

#[async_trait::async_trait]
impl BatchableTask for DummyTask {
    const TASK_TYPE: &'static str = "DummyTask";

    fn group(&self) -> String {
        "dummy group".to_string()
    }

    async fn process_group(_tasks: Vec<Self>) -> ProcessOutcome {
        ProcessOutcome::Done
    }
}

fn container(value: u32) -> TaskContainer {
    TaskContainer::new(&DummyTask { value }).expect("encode dummy task")
}

fn containers(n: u32) -> Vec<TaskContainer> {
    (0..n).map(container).collect()
}

// ---------------------------------------------------------------------------
// Inserting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inserting_concurrently_keeps_every_container() {
    let store = GroupedStore::new();

    let handles: Vec<_> = (0..100)
        .map(|value| {
            let store = store.clone();
            tokio::spawn(async move {
                store.insert(container(value));
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    let (group, inserted) = &all[0];
    assert_eq!(group, "dummy group");
    assert_eq!(inserted.len(), 100, "insert must not deduplicate or drop");
}

#[tokio::test]
async fn inserting_duplicates_is_allowed() {
    let store = GroupedStore::new();
    let duplicate = container(1);

    store.insert(duplicate.clone());
    store.insert(duplicate.clone());
    store.insert(duplicate);

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.len(), 3);
}

#[tokio::test]
async fn insert_is_visible_after_any_awaited_operation() {
    let store = GroupedStore::new();
    store.insert(container(1));

    // merge of nothing is still a synchronization point
    store.merge(Vec::new()).await;

    let all = store.all_tasks().await;
    assert_eq!(all[0].1.len(), 1);
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merging_twice_is_idempotent() {
    let store = GroupedStore::new();
    let batch = containers(2);

    store
        .merge(vec![("dummy group".to_string(), batch.clone())])
        .await;
    store.merge(vec![("dummy group".to_string(), batch)]).await;

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.len(), 2, "duplicate ids must not merge twice");
}

#[tokio::test]
async fn merging_disjoint_sets_appends_in_order() {
    let store = GroupedStore::new();
    let first = containers(2);
    let second = containers(2);

    store
        .merge(vec![("dummy group".to_string(), first.clone())])
        .await;
    store
        .merge(vec![("dummy group".to_string(), second.clone())])
        .await;

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    let ids: Vec<_> = all[0].1.iter().map(|c| c.id).collect();
    let expected: Vec<_> = first.iter().chain(second.iter()).map(|c| c.id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn merging_concurrently_keeps_every_container() {
    let store = GroupedStore::new();

    let handles: Vec<_> = (0..100)
        .map(|value| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .merge(vec![("dummy group".to_string(), vec![container(value)])])
                    .await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1.len(), 100);
}

#[tokio::test]
async fn merging_an_empty_list_does_not_create_the_group() {
    let store = GroupedStore::new();

    store
        .merge(vec![("dummy group".to_string(), Vec::new())])
        .await;

    assert!(store.all_tasks().await.is_empty());
}

// ---------------------------------------------------------------------------
// Removing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removing_every_container_drops_the_group_key() {
    let store = GroupedStore::new();
    let batch = containers(2);
    store
        .merge(vec![("dummy group".to_string(), batch.clone())])
        .await;

    store.remove(&batch, "dummy group").await;

    let all = store.all_tasks().await;
    assert!(
        all.is_empty(),
        "an exhausted group must be absent, never empty: {all:?}"
    );
}

#[tokio::test]
async fn removing_a_subset_keeps_the_rest_in_order() {
    let store = GroupedStore::new();
    let batch = containers(4);
    store
        .merge(vec![("dummy group".to_string(), batch.clone())])
        .await;

    store.remove(&batch[1..3], "dummy group").await;

    let all = store.all_tasks().await;
    let ids: Vec<_> = all[0].1.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![batch[0].id, batch[3].id]);
}

#[tokio::test]
async fn removing_concurrently_empties_the_store() {
    let store = GroupedStore::new();
    for value in 0..100 {
        store.insert(container(value));
    }
    let all = store.all_tasks().await;
    let inserted = all[0].1.clone();

    let handles: Vec<_> = inserted
        .into_iter()
        .map(|c| {
            let store = store.clone();
            tokio::spawn(async move {
                store.remove(std::slice::from_ref(&c), &c.group).await;
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(store.all_tasks().await.is_empty());
}

#[tokio::test]
async fn remove_all_tasks_for_group_clears_only_that_group() {
    let store = GroupedStore::new();
    store
        .merge(vec![
            ("dummy group".to_string(), containers(2)),
            ("other group".to_string(), containers(1)),
        ])
        .await;

    store.remove_all_tasks_for("dummy group").await;

    let all = store.all_tasks().await;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, "other group");
}

#[tokio::test]
async fn remove_all_tasks_clears_the_store() {
    let store = GroupedStore::new();
    store
        .merge(vec![
            ("dummy group".to_string(), containers(2)),
            ("other group".to_string(), containers(1)),
        ])
        .await;

    store.remove_all_tasks().await;

    assert!(store.all_tasks().await.is_empty());
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chunking_splits_a_group_preserving_order() {
    let store = GroupedStore::new();
    let batch = containers(10);
    store
        .merge(vec![("dummy group".to_string(), batch.clone())])
        .await;

    let chunks = store.chunked_tasks(4).await;
    assert_eq!(chunks.len(), 3);

    assert_eq!(chunks[0].1.len(), 4);
    assert_eq!(chunks[1].1.len(), 4);
    assert_eq!(chunks[2].1.len(), 2);
    for (group, _) in &chunks {
        assert_eq!(group, "dummy group");
    }

    let chunked_ids: Vec<_> = chunks
        .iter()
        .flat_map(|(_, containers)| containers.iter().map(|c| c.id))
        .collect();
    let expected: Vec<_> = batch.iter().map(|c| c.id).collect();
    assert_eq!(chunked_ids, expected, "order must hold across chunk boundaries");
}

#[tokio::test]
async fn chunking_an_empty_store_yields_nothing() {
    let store = GroupedStore::new();
    assert!(store.chunked_tasks(4).await.is_empty());
}
