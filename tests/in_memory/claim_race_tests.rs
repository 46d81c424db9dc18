//! Concurrent claim tests: every task is handed out at most once.

use super::helpers::{ManualClock, Store, start_time};
use deferq::queue::{
    adapters::memory::InMemoryQueueStore,
    domain::{QueueName, TaskId},
    services::{PushOptions, QueueService},
};
use eyre::{WrapErr, ensure};
use rstest::rstest;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

type Service = QueueService<Store, ManualClock>;

fn service(candidate_limit: usize) -> Service {
    let clock = Arc::new(ManualClock::at(start_time()));
    let store =
        InMemoryQueueStore::new(Arc::clone(&clock)).with_candidate_limit(candidate_limit);
    QueueService::new(Arc::new(store), clock)
}

async fn push_many(service: &Service, count: usize) -> Result<BTreeSet<TaskId>, eyre::Report> {
    let mut ids = BTreeSet::new();
    for index in 0..count {
        let id = service
            .push(
                QueueName::default_queue(),
                json!({ "index": index }),
                PushOptions::default(),
            )
            .await
            .wrap_err("push task")?;
        ids.insert(id);
    }
    Ok(ids)
}

async fn drain_concurrently(
    service: &Service,
    workers: usize,
) -> Result<Vec<TaskId>, eyre::Report> {
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let worker = service.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(id) = worker.pull(None).await?.task_id() {
                    claimed.push(id);
                    tokio::task::yield_now().await;
                }
                Ok::<_, deferq::queue::services::QueueServiceError>(claimed)
            })
        })
        .collect();

    let mut claims = Vec::new();
    for handle in handles {
        claims.extend(handle.await.wrap_err("join puller")??);
    }
    Ok(claims)
}

#[rstest]
#[case(1, 40)]
#[case(8, 40)]
#[case(16, 200)]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_workers_claim_each_task_once(
    #[case] workers: usize,
    #[case] tasks: usize,
) -> Result<(), eyre::Report> {
    let service = service(1000);
    let pushed = push_many(&service, tasks).await?;

    let claims = drain_concurrently(&service, workers).await?;

    let unique: BTreeSet<TaskId> = claims.iter().copied().collect();
    ensure!(claims.len() == tasks, "claimed {} of {tasks} tasks", claims.len());
    ensure!(unique == pushed, "claimed set differs from pushed set");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn narrow_candidate_window_still_drains_queue() -> Result<(), eyre::Report> {
    let service = service(2);
    let pushed = push_many(&service, 25).await?;

    let claims = drain_concurrently(&service, 6).await?;

    let unique: BTreeSet<TaskId> = claims.iter().copied().collect();
    ensure!(claims.len() == unique.len(), "a task was claimed twice");
    ensure!(unique == pushed, "window left tasks behind");
    Ok(())
}
