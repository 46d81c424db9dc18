//! JSON configuration for queue deployments.
//!
//! A representative file is:
//!
//! ```json
//! {
//!   "database_url": "postgres://queue@localhost/app",
//!   "channel": "queue_tasks",
//!   "candidate_limit": 1000,
//!   "capabilities": { "returning": true, "notifications": true },
//!   "pool_size": 4,
//!   "worker": {
//!     "queue": "mail",
//!     "concurrency": 2,
//!     "max_idle_secs": 60,
//!     "listen_poll_millis": 250
//!   }
//! }
//! ```
//!
//! Every key except `database_url` is optional.

use crate::queue::{
    adapters::postgres::{BackendCapabilities, DEFAULT_CANDIDATE_LIMIT, DEFAULT_CHANNEL},
    domain::{QueueDomainError, QueueName},
    services::WorkerSettings,
};
use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be opened or read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// The worker queue name is invalid.
    #[error(transparent)]
    QueueName(#[from] QueueDomainError),
}

/// Top-level queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// `PostgreSQL` connection URL.
    pub database_url: String,
    /// Notification channel published on insert.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Size of the planner's candidate window.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: i64,
    /// Backend features the planner may rely on.
    #[serde(default)]
    pub capabilities: BackendCapabilities,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Worker loop settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Worker section of [`QueueConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queue to consume; every queue when absent.
    #[serde(default)]
    pub queue: Option<String>,
    /// Tasks run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Cap on one idle wait, in seconds.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Notification socket poll interval, in milliseconds.
    #[serde(default = "default_listen_poll_millis")]
    pub listen_poll_millis: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: None,
            concurrency: default_concurrency(),
            max_idle_secs: default_max_idle_secs(),
            listen_poll_millis: default_listen_poll_millis(),
        }
    }
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_owned()
}

const fn default_candidate_limit() -> i64 {
    DEFAULT_CANDIDATE_LIMIT
}

const fn default_pool_size() -> u32 {
    4
}

const fn default_concurrency() -> usize {
    1
}

const fn default_max_idle_secs() -> u64 {
    60
}

const fn default_listen_poll_millis() -> u64 {
    250
}

impl QueueConfig {
    /// Parses and validates configuration JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, and
    /// otherwise the errors of [`Self::from_json`].
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: path.to_string(),
            source,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let file_name = path.file_name().ok_or_else(|| {
            read_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
        let bytes = dir.read(file_name).map_err(read_error)?;
        Self::from_json(&bytes)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".to_owned()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::Invalid("channel must not be empty".to_owned()));
        }
        if self.candidate_limit < 1 {
            return Err(ConfigError::Invalid("candidate_limit must be positive".to_owned()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be positive".to_owned()));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Builds worker loop settings from the worker section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::QueueName`] when the queue name is invalid.
    pub fn worker_settings(&self) -> Result<WorkerSettings, ConfigError> {
        let queue = self
            .worker
            .queue
            .as_deref()
            .map(QueueName::new)
            .transpose()?;
        Ok(WorkerSettings {
            queue,
            concurrency: self.worker.concurrency,
            max_idle: Duration::from_secs(self.worker.max_idle_secs),
        })
    }

    /// Returns the listener's socket poll interval.
    #[must_use]
    pub const fn listen_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker.listen_poll_millis)
    }
}
