//! Shared helpers for in-memory queue integration tests.

pub use crate::test_helpers::{ManualClock, RecordingModel, start_time};
use deferq::queue::{
    adapters::memory::InMemoryQueueStore,
    ports::{ModelHandle, ModelResolver},
    services::{ModelRegistry, QueueCaller, QueueRunner, QueueService},
};
use rstest::fixture;
use std::sync::Arc;

/// Store type used across in-memory tests.
pub type Store = InMemoryQueueStore<ManualClock>;

/// Producer and worker sides wired to one in-memory store.
pub struct QueueStack {
    pub clock: Arc<ManualClock>,
    pub store: Arc<Store>,
    pub model: Arc<RecordingModel>,
    pub caller: QueueCaller<Store, ManualClock>,
    pub queue: QueueService<Store, ManualClock>,
    pub runner: QueueRunner<Store, ManualClock>,
}

impl QueueStack {
    /// Builds a stack exposing `sale.process` and `sale.notify`.
    pub fn new(model: RecordingModel) -> Self {
        let clock = Arc::new(ManualClock::at(start_time()));
        let store = Arc::new(InMemoryQueueStore::new(Arc::clone(&clock)));
        let recorder = Arc::new(model);
        let handle: Arc<dyn ModelHandle> = recorder.clone();
        let resolver: Arc<dyn ModelResolver> =
            Arc::new(ModelRegistry::new().register("sale", handle, ["process", "notify"]));
        let queue = QueueService::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            caller: QueueCaller::new(queue.clone(), Arc::clone(&resolver)),
            runner: QueueRunner::new(Arc::clone(&store), Arc::clone(&clock), resolver),
            queue,
            model: recorder,
            store,
            clock,
        }
    }
}

/// Provides a stack whose model knows records 1 to 5.
#[fixture]
pub fn stack() -> QueueStack {
    QueueStack::new(RecordingModel::with_records(1..=5))
}
