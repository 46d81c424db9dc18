//! Start-up wiring from a [`QueueConfig`] to running queue components.
//!
//! Applications register their target types in a resolver and hand it to
//! [`run_worker`]; operator tooling only needs [`connect_store`].

use crate::config::{ConfigError, QueueConfig};
use crate::queue::{
    adapters::postgres::{PostgresQueueListener, PostgresQueueStore, QueuePgPool},
    ports::{ListenerError, ModelResolver, QueueListener},
    services::{QueueRunner, QueueService, QueueWorker, WorkerError},
};
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use mockable::DefaultClock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

/// Worker type produced by [`build_worker`].
pub type PostgresWorker = QueueWorker<PostgresQueueStore, DefaultClock>;

/// Errors raised while wiring or running queue components.
#[derive(Debug, Error)]
pub enum HostError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The connection pool could not be built.
    #[error("connection pool init failed: {0}")]
    Pool(#[from] PoolError),
    /// The notification listener could not subscribe.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The worker loop stopped with an error.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Builds a pooled store configured from `config`.
///
/// # Errors
///
/// Returns [`HostError::Pool`] when the pool cannot be built.
pub fn connect_store(config: &QueueConfig) -> Result<PostgresQueueStore, HostError> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.as_str());
    let pool: QueuePgPool = Pool::builder().max_size(config.pool_size).build(manager)?;
    Ok(PostgresQueueStore::new(pool)
        .with_capabilities(config.capabilities)
        .with_candidate_limit(config.candidate_limit)
        .with_channel(config.channel.as_str()))
}

/// Subscribes a listener for the configured channel and worker queue.
///
/// # Errors
///
/// Returns [`HostError::Config`] for an invalid worker queue name and
/// [`HostError::Listener`] when the subscription fails.
pub async fn connect_listener(config: &QueueConfig) -> Result<PostgresQueueListener, HostError> {
    let settings = config.worker_settings()?;
    let listener = PostgresQueueListener::connect(&config.database_url, &config.channel).await?;
    Ok(listener
        .for_queue(settings.queue)
        .with_poll_interval(config.listen_poll_interval()))
}

/// Builds a worker whose runner resolves targets through `resolver`.
///
/// A listener is attached when notifications are enabled; if it cannot
/// subscribe the worker falls back to polling.
///
/// # Errors
///
/// Returns [`HostError::Config`] or [`HostError::Pool`] when wiring fails.
pub async fn build_worker(
    config: &QueueConfig,
    resolver: Arc<dyn ModelResolver>,
) -> Result<PostgresWorker, HostError> {
    let settings = config.worker_settings()?;
    let store = Arc::new(connect_store(config)?);
    let clock = Arc::new(DefaultClock);
    let queue = QueueService::new(Arc::clone(&store), Arc::clone(&clock));
    let runner = QueueRunner::new(store, clock, resolver);
    let worker = QueueWorker::new(queue, runner, settings);
    if !config.capabilities.notifications {
        return Ok(worker);
    }
    match connect_listener(config).await {
        Ok(listener) => {
            let shared: Arc<dyn QueueListener> = Arc::new(listener);
            Ok(worker.with_listener(shared))
        }
        Err(err) => {
            warn!(error = %err, "queue listener unavailable, polling instead");
            Ok(worker)
        }
    }
}

/// Runs a configured worker until `shutdown` flips.
///
/// # Errors
///
/// Returns the wiring errors of [`build_worker`] and
/// [`HostError::Worker`] when the loop fails.
pub async fn run_worker(
    config: &QueueConfig,
    resolver: Arc<dyn ModelResolver>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), HostError> {
    let worker = build_worker(config, resolver).await?;
    worker.run(shutdown).await?;
    Ok(())
}
