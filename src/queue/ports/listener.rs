//! Push-notification port used by idle workers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for listener operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Wake-up channel fed by task inserts.
#[async_trait]
pub trait QueueListener: Send + Sync {
    /// Waits until a push notification arrives or `timeout` elapses.
    ///
    /// Returns `true` when woken by a notification. Notifications published
    /// since the previous call are not lost.
    async fn wait(&self, timeout: Duration) -> ListenerResult<bool>;
}

/// Errors returned by listener implementations.
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    /// The notification channel was closed by its publisher.
    #[error("notification channel closed")]
    Closed,

    /// Connection-level failure.
    #[error("listener connection error: {0}")]
    Connection(Arc<dyn std::error::Error + Send + Sync>),
}

impl ListenerError {
    /// Wraps a connection error.
    pub fn connection(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection(Arc::new(err))
    }
}
