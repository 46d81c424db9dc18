//! Long-running worker loop that claims and runs queued tasks.

use super::queue::{QueueService, QueueServiceError};
use super::runner::{QueueRunner, RunError, RunOutcome};
use crate::queue::{
    domain::{QueueName, TaskId},
    ports::{QueueListener, QueueStore},
};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

/// Default cap on a single idle wait.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(60);

/// Worker loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Queue to consume; `None` consumes every queue.
    pub queue: Option<QueueName>,
    /// Maximum number of tasks running at once.
    pub concurrency: usize,
    /// Longest time to wait between pulls when idle.
    pub max_idle: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            queue: None,
            concurrency: 1,
            max_idle: DEFAULT_MAX_IDLE,
        }
    }
}

/// Errors that stop the worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Pulling or reading tasks failed.
    #[error(transparent)]
    Queue(#[from] QueueServiceError),
    /// The concurrency limiter was closed.
    #[error("worker permits closed")]
    PermitsClosed,
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Counts of tasks handled by [`QueueWorker::run_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks whose call ran.
    pub executed: usize,
    /// Tasks finished without a call because their record was gone.
    pub skipped: usize,
    /// Tasks left dequeued but unfinished after an error.
    pub failed: usize,
}

impl WorkerReport {
    fn record(&mut self, result: &Result<RunOutcome, RunError>) {
        match result {
            Ok(RunOutcome::Executed) => self.executed += 1,
            Ok(RunOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Claims due tasks and runs them until shut down.
pub struct QueueWorker<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    queue: QueueService<S, C>,
    runner: QueueRunner<S, C>,
    listener: Option<Arc<dyn QueueListener>>,
    settings: WorkerSettings,
}

impl<S, C> QueueWorker<S, C>
where
    S: QueueStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a worker without push notifications; idle waits sleep.
    #[must_use]
    pub const fn new(
        queue: QueueService<S, C>,
        runner: QueueRunner<S, C>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            runner,
            listener: None,
            settings,
        }
    }

    /// Wakes idle waits early when `listener` reports a push.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn QueueListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Returns the loop settings.
    #[must_use]
    pub const fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Runs every task that is due now, one at a time, and returns counts.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Queue`] when a pull fails.
    pub async fn run_pending(&self) -> WorkerResult<WorkerReport> {
        let mut report = WorkerReport::default();
        while let Some(claimed) = self
            .queue
            .pull(self.settings.queue.as_ref())
            .await?
            .claimed
        {
            let result = self.runner.run_claimed(claimed.id).await;
            log_result(claimed.id, &result);
            report.record(&result);
        }
        Ok(report)
    }

    /// Runs the claim loop until `shutdown` changes or its sender is
    /// dropped, then waits for in-flight tasks.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::PermitsClosed`] if the concurrency limiter is
    /// closed underneath the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        info!(
            queue = ?self.settings.queue.as_ref().map(QueueName::as_str),
            concurrency,
            "queue worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let permit = tokio::select! {
                acquired = Arc::clone(&permits).acquire_owned() => {
                    acquired.map_err(|_| WorkerError::PermitsClosed)?
                }
                _ = shutdown.changed() => break,
            };

            let wait = match self.queue.pull(self.settings.queue.as_ref()).await {
                Ok(outcome) => {
                    if let Some(claimed) = outcome.claimed {
                        let runner = self.runner.clone();
                        tokio::spawn(async move {
                            let result = runner.run_claimed(claimed.id).await;
                            log_result(claimed.id, &result);
                            drop(permit);
                        });
                        continue;
                    }
                    outcome
                        .next_wakeup
                        .map_or(self.settings.max_idle, |due| due.min(self.settings.max_idle))
                }
                Err(err) => {
                    warn!(error = %err, "pull failed, backing off");
                    self.settings.max_idle
                }
            };
            drop(permit);

            tokio::select! {
                () = self.idle(wait) => {}
                _ = shutdown.changed() => break,
            }
        }

        let in_flight = u32::try_from(concurrency).unwrap_or(u32::MAX);
        drop(
            permits
                .acquire_many(in_flight)
                .await
                .map_err(|_| WorkerError::PermitsClosed)?,
        );
        info!("queue worker stopped");
        Ok(())
    }

    async fn idle(&self, wait: Duration) {
        let Some(listener) = &self.listener else {
            tokio::time::sleep(wait).await;
            return;
        };
        match listener.wait(wait).await {
            Ok(true) => debug!("woken by queue notification"),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "queue listener failed, sleeping instead");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

fn log_result(id: TaskId, result: &Result<RunOutcome, RunError>) {
    match result {
        Ok(RunOutcome::Executed) => info!(task_id = %id, "task finished"),
        Ok(RunOutcome::Skipped) => info!(task_id = %id, "task finished without a call"),
        Err(err) => error!(task_id = %id, error = %err, "task failed, left unfinished"),
    }
}
