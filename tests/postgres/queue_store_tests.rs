//! Planner and persistence tests against the embedded `PostgreSQL` cluster.

use super::helpers::{PreparedStore, TestCluster, prepared_store, shared_test_cluster};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use deferq::queue::{
    adapters::postgres::{BackendCapabilities, PostgresQueueStore},
    domain::{NewQueueTask, QueueName, QueueTask, TaskId},
    ports::{QueueStore, QueueStoreError},
};
use mockable::{Clock, DefaultClock};
use rstest::rstest;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

const FALLBACK: BackendCapabilities = BackendCapabilities {
    returning: false,
    notifications: false,
};

fn task(name: &str, index: usize) -> NewQueueTask {
    NewQueueTask::new(
        QueueName::new(name).expect("valid queue name"),
        json!({ "index": index }),
        &DefaultClock,
    )
}

async fn push(store: &PostgresQueueStore, name: &str, index: usize) -> TaskId {
    store.insert(&task(name, index)).await.expect("insert task")
}

async fn stored(store: &PostgresQueueStore, id: TaskId) -> QueueTask {
    store
        .find_by_id(id)
        .await
        .expect("lookup task")
        .expect("task exists")
}

/// Timestamps round-trip through `PostgreSQL` at microsecond precision.
fn micros(at: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    at.map(|instant| instant.trunc_subsecs(6))
}

fn prepare(
    cluster: &'static TestCluster,
    capabilities: BackendCapabilities,
    pool_size: u32,
) -> PreparedStore {
    prepared_store(cluster, capabilities, pool_size).expect("prepare test database")
}

#[rstest]
#[case::returning(BackendCapabilities::default())]
#[case::fallback(FALLBACK)]
fn pull_claims_due_task_and_keeps_data(
    shared_test_cluster: &'static TestCluster,
    #[case] capabilities: BackendCapabilities,
) {
    let prepared = prepare(shared_test_cluster, capabilities, 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let id = push(store, "mail", 1).await;

        let outcome = store.pull(None).await.expect("pull task");
        let row = stored(store, id).await;

        let claimed = outcome.claimed.expect("task claimed");
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.name.as_str(), "mail");
        assert_eq!(outcome.next_wakeup, None);
        assert_eq!(row.data(), &json!({ "index": 1 }));
        assert!(row.dequeued_at().is_some());
        assert!(row.finished_at().is_none());
        assert_eq!(store.pull(None).await.expect("pull again").claimed, None);
    });
}

#[rstest]
#[case::returning(BackendCapabilities::default())]
#[case::fallback(FALLBACK)]
fn future_task_reports_wakeup_hint(
    shared_test_cluster: &'static TestCluster,
    #[case] capabilities: BackendCapabilities,
) {
    let prepared = prepare(shared_test_cluster, capabilities, 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let later = DefaultClock.utc() + TimeDelta::seconds(60);
        store
            .insert(&task("default", 1).with_scheduled_at(Some(later)))
            .await
            .expect("insert scheduled task");

        let outcome = store.pull(None).await.expect("pull task");

        assert_eq!(outcome.claimed, None);
        let wakeup = outcome.next_wakeup.expect("wake-up hint");
        assert!(wakeup <= Duration::from_secs(60), "hint too long: {wakeup:?}");
        assert!(wakeup >= Duration::from_secs(50), "hint too short: {wakeup:?}");
    });
}

#[rstest]
fn queue_filter_and_order_are_respected(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default(), 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let soon = DefaultClock.utc() + TimeDelta::minutes(5);
        let with_deadline = store
            .insert(&task("mail", 1).with_expected_at(Some(soon)))
            .await
            .expect("insert task with deadline");
        let unconstrained = push(store, "mail", 2).await;
        push(store, "reports", 3).await;
        let mail = QueueName::new("mail").expect("valid queue name");

        let mut order = Vec::new();
        while let Some(id) = store.pull(Some(&mail)).await.expect("pull mail").task_id() {
            order.push(id);
        }

        assert_eq!(order, vec![unconstrained, with_deadline]);
        assert!(store.pull(None).await.expect("pull any").claimed.is_some());
    });
}

#[rstest]
#[case::returning(BackendCapabilities::default())]
#[case::fallback(FALLBACK)]
fn concurrent_pulls_never_share_a_task(
    shared_test_cluster: &'static TestCluster,
    #[case] capabilities: BackendCapabilities,
) {
    let prepared = prepare(shared_test_cluster, capabilities, 8);
    prepared.block_on(async {
        let mut pushed = BTreeSet::new();
        for index in 0..24 {
            pushed.insert(push(&prepared.store, "default", index).await);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = prepared.store.clone();
                tokio::spawn(async move {
                    let mut claimed = Vec::new();
                    while let Some(id) = store.pull(None).await?.task_id() {
                        claimed.push(id);
                    }
                    Ok::<_, QueueStoreError>(claimed)
                })
            })
            .collect();
        let mut claims = Vec::new();
        for handle in handles {
            claims.extend(handle.await.expect("join puller").expect("pull tasks"));
        }

        let unique: BTreeSet<TaskId> = claims.iter().copied().collect();
        assert_eq!(claims.len(), unique.len(), "a task was claimed twice");
        assert_eq!(unique, pushed);
    });
}

#[rstest]
fn finished_task_is_persisted(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default(), 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let id = push(store, "default", 1).await;
        store.pull(None).await.expect("pull task");
        let mut row = stored(store, id).await;

        assert!(row.finish(&DefaultClock));
        store.update(&row).await.expect("update task");

        assert_eq!(stored(store, id).await.finished_at(), micros(row.finished_at()));
    });
}

#[rstest]
fn stale_snapshot_keeps_first_completion(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default(), 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let id = push(store, "default", 1).await;
        store.pull(None).await.expect("pull task");
        let snapshot = stored(store, id).await;
        let mut first = snapshot.clone();
        assert!(first.finish(&DefaultClock));
        store.update(&first).await.expect("first update");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut stale = snapshot;
        assert!(stale.finish(&DefaultClock));
        store.update(&stale).await.expect("stale update");

        let row = stored(store, id).await;
        assert_eq!(row.finished_at(), micros(first.finished_at()));
        assert_ne!(row.finished_at(), micros(stale.finished_at()));
    });
}

#[rstest]
#[case::commit(true)]
#[case::rollback(false)]
fn unit_of_work_publishes_only_on_commit(
    shared_test_cluster: &'static TestCluster,
    #[case] commit: bool,
) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default(), 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let id = push(store, "default", 1).await;
        store.pull(None).await.expect("pull task");
        let mut row = stored(store, id).await;
        assert!(row.finish(&DefaultClock));

        let mut unit = store.begin().await.expect("begin unit");
        unit.update(&row).await.expect("stage completion");
        assert!(!stored(store, id).await.is_finished(), "staged write leaked");
        if commit {
            unit.commit().await.expect("commit unit");
        } else {
            unit.rollback().await.expect("roll back unit");
        }

        assert_eq!(stored(store, id).await.is_finished(), commit);
    });
}

#[rstest]
fn missing_task_lookup_and_update(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default(), 2);
    let store = &prepared.store;
    prepared.block_on(async {
        let missing = TaskId::new(9_999);
        let ghost = task("default", 1).into_task(missing);

        assert!(store.find_by_id(missing).await.expect("lookup task").is_none());
        let result = store.update(&ghost).await;
        assert!(matches!(result, Err(QueueStoreError::NotFound(id)) if id == missing));

        let mut unit = store.begin().await.expect("begin unit");
        let staged = unit.update(&ghost).await;
        assert!(matches!(staged, Err(QueueStoreError::NotFound(id)) if id == missing));
        unit.rollback().await.expect("roll back unit");
    });
}
