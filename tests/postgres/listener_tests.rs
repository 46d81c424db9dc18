//! Push notification tests for the `LISTEN`-based listener.

use super::helpers::{
    PreparedStore, TEST_CHANNEL, TestCluster, prepared_store, shared_test_cluster,
    terminate_other_sessions,
};
use deferq::queue::{
    adapters::postgres::{BackendCapabilities, PostgresQueueListener},
    domain::{NewQueueTask, QueueName},
    ports::{QueueListener, QueueStore},
};
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::json;
use std::time::Duration;

fn task(name: &str) -> NewQueueTask {
    NewQueueTask::new(
        QueueName::new(name).expect("valid queue name"),
        json!({}),
        &DefaultClock,
    )
}

fn prepare(cluster: &'static TestCluster, capabilities: BackendCapabilities) -> PreparedStore {
    prepared_store(cluster, capabilities, 2).expect("prepare test database")
}

async fn mail_listener(prepared: &PreparedStore) -> PostgresQueueListener {
    PostgresQueueListener::connect(&prepared.url, TEST_CHANNEL)
        .await
        .expect("listener connects")
        .for_queue(Some(QueueName::new("mail").expect("valid queue name")))
        .with_poll_interval(Duration::from_millis(20))
}

#[rstest]
fn insert_wakes_listener_on_matching_queue(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default());
    prepared.block_on(async {
        let listener = mail_listener(&prepared).await;

        assert!(
            !listener
                .wait(Duration::from_millis(100))
                .await
                .expect("idle wait")
        );

        prepared
            .store
            .insert(&task("reports"))
            .await
            .expect("insert foreign task");
        assert!(
            !listener
                .wait(Duration::from_millis(200))
                .await
                .expect("wait ignores other queues")
        );

        prepared
            .store
            .insert(&task("mail"))
            .await
            .expect("insert matching task");
        assert!(
            listener
                .wait(Duration::from_secs(5))
                .await
                .expect("wait for notification")
        );
    });
}

#[rstest]
fn disabled_notifications_leave_listener_idle(shared_test_cluster: &'static TestCluster) {
    let capabilities = BackendCapabilities {
        notifications: false,
        ..BackendCapabilities::default()
    };
    let prepared = prepare(shared_test_cluster, capabilities);
    prepared.block_on(async {
        let listener = PostgresQueueListener::connect(&prepared.url, TEST_CHANNEL)
            .await
            .expect("listener connects")
            .with_poll_interval(Duration::from_millis(20));

        prepared
            .store
            .insert(&task("default"))
            .await
            .expect("insert task");

        assert!(
            !listener
                .wait(Duration::from_millis(200))
                .await
                .expect("wait times out")
        );
    });
}

#[rstest]
fn session_is_resubscribed_after_termination(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default());
    prepared.block_on(async {
        let listener = mail_listener(&prepared).await;
        terminate_other_sessions(&prepared.url).expect("terminate listener session");

        assert!(
            listener.wait(Duration::from_millis(100)).await.is_err(),
            "dead session was not reported"
        );
        assert!(
            listener
                .wait(Duration::from_millis(100))
                .await
                .expect("wait resubscribes"),
            "a fresh subscription must ask the worker to pull"
        );
        assert!(
            !listener
                .wait(Duration::from_millis(100))
                .await
                .expect("idle wait after resubscribe")
        );

        prepared
            .store
            .insert(&task("mail"))
            .await
            .expect("insert matching task");
        assert!(
            listener
                .wait(Duration::from_secs(5))
                .await
                .expect("wait for notification")
        );
    });
}

#[rstest]
fn abandoned_wait_releases_session(shared_test_cluster: &'static TestCluster) {
    let prepared = prepare(shared_test_cluster, BackendCapabilities::default());
    prepared.block_on(async {
        let listener = mail_listener(&prepared).await;

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), listener.wait(Duration::from_secs(10)))
                .await;
        assert!(abandoned.is_err(), "long wait should still be pending");

        let next = tokio::time::timeout(Duration::from_secs(1), listener.wait(Duration::from_millis(100)))
            .await
            .expect("session released after cancellation");
        assert!(!next.expect("idle wait"));
    });
}
