//! In-memory push notifications backed by a `watch` channel.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{Mutex, watch};

use crate::queue::ports::{ListenerError, ListenerResult, QueueListener};

/// Listener subscribed to an [`InMemoryQueueStore`](super::InMemoryQueueStore).
///
/// The channel remembers the last value seen, so an insert that lands between
/// a pull and the following wait still wakes the worker.
#[derive(Debug)]
pub struct InMemoryQueueListener {
    receiver: Mutex<watch::Receiver<u64>>,
}

impl InMemoryQueueListener {
    pub(super) fn new(receiver: watch::Receiver<u64>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl QueueListener for InMemoryQueueListener {
    async fn wait(&self, timeout: Duration) -> ListenerResult<bool> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.changed()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(ListenerError::Closed),
            Err(_) => Ok(false),
        }
    }
}
