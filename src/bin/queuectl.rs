//! Operator command line for a `PostgreSQL`-backed task queue.
//!
//! Usage:
//!
//! ```text
//! queuectl migrate <config-path>
//! queuectl push <config-path> <queue> <json-data>
//! queuectl pull <config-path> [queue]
//! queuectl show <config-path> <task-id>
//! queuectl finish <config-path> <task-id>...
//! queuectl copy <config-path> <task-id>...
//! ```
//!
//! `pull` claims a task without running it: no worker picks it up
//! afterwards, so the row stays dequeued but unfinished. Use it to take a
//! task out of circulation, then `finish` it to close the row or `copy` it
//! to queue a fresh run.
//!
//! The JSON file at `config-path` must deserialize into a
//! [`deferq::config::QueueConfig`]. Results are written to stdout as JSON;
//! logs go to stderr and honour `RUST_LOG`.

use camino::{Utf8Path, Utf8PathBuf};
use deferq::config::{ConfigError, QueueConfig};
use deferq::host::{HostError, connect_store};
use deferq::queue::{
    adapters::postgres::PostgresQueueStore,
    domain::{QueueName, TaskId},
    services::{PushOptions, QueueService, QueueServiceError},
};
use deferq::telemetry::init_tracing;
use mockable::DefaultClock;
use serde_json::{Value, json};
use std::env;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Builder;
use tracing::info;

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Service = QueueService<PostgresQueueStore, DefaultClock>;

/// Errors that can occur during CLI operations.
#[derive(Debug, Error)]
enum CliError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid task data: {0}")]
    Data(#[source] serde_json::Error),
    #[error("invalid queue name: {0}")]
    QueueName(#[source] deferq::queue::domain::QueueDomainError),
    #[error(transparent)]
    Connect(#[from] HostError),
    #[error("runtime init failed: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error(transparent)]
    Queue(#[from] QueueServiceError),
    #[error("failed to write output: {0}")]
    Output(#[source] std::io::Error),
}

#[derive(Debug)]
enum Operation {
    Migrate,
    Push { queue: String, data: String },
    Pull { queue: Option<String> },
    Show { id: TaskId },
    Finish { ids: Vec<TaskId> },
    Copy { ids: Vec<TaskId> },
}

impl Operation {
    fn parse(name: &str, mut rest: impl Iterator<Item = String>) -> Result<Self, CliError> {
        let operation = match name {
            "migrate" => Self::Migrate,
            "push" => {
                let queue = required(&mut rest, "queue")?;
                let data = required(&mut rest, "json data")?;
                Self::Push { queue, data }
            }
            "pull" => Self::Pull { queue: rest.next() },
            "show" => Self::Show {
                id: parse_id(&required(&mut rest, "task id")?)?,
            },
            "finish" => Self::Finish {
                ids: parse_ids(&mut rest)?,
            },
            "copy" => Self::Copy {
                ids: parse_ids(&mut rest)?,
            },
            other => {
                return Err(CliError::InvalidArgs(format!(
                    "unknown operation '{other}'; expected migrate, push, pull, show, finish, or copy"
                )));
            }
        };
        if let Some(extra) = rest.next() {
            return Err(CliError::InvalidArgs(format!(
                "unexpected extra argument: {extra}"
            )));
        }
        Ok(operation)
    }
}

fn required(args: &mut impl Iterator<Item = String>, what: &str) -> Result<String, CliError> {
    args.next()
        .ok_or_else(|| CliError::InvalidArgs(format!("missing {what} argument")))
}

fn parse_ids(args: &mut impl Iterator<Item = String>) -> Result<Vec<TaskId>, CliError> {
    let ids = args
        .map(|raw| parse_id(&raw))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(CliError::InvalidArgs("missing task id argument".into()));
    }
    Ok(ids)
}

fn parse_id(raw: &str) -> Result<TaskId, CliError> {
    raw.parse::<i64>()
        .map(TaskId::new)
        .map_err(|err| CliError::InvalidArgs(format!("invalid task id '{raw}': {err}")))
}

fn main() -> Result<(), BoxError> {
    init_tracing()?;
    let args = collect_args()?;
    run_cli(args.into_iter()).map_err(Into::into)
}

fn collect_args() -> Result<Vec<String>, CliError> {
    env::args_os()
        .map(|arg_os| {
            arg_os
                .into_string()
                .map_err(|_| CliError::InvalidArgs("argument is not valid UTF-8".into()))
        })
        .collect()
}

fn parse_args(
    mut args: impl Iterator<Item = String>,
) -> Result<(Operation, Utf8PathBuf), CliError> {
    let _program = args.next();
    let name = args
        .next()
        .ok_or_else(|| CliError::InvalidArgs("missing operation argument".into()))?;
    let config_path = args
        .next()
        .map(Utf8PathBuf::from)
        .ok_or_else(|| CliError::InvalidArgs("missing config path argument".into()))?;
    let operation = Operation::parse(&name, args)?;
    Ok((operation, config_path))
}

fn run_cli(args: impl Iterator<Item = String>) -> Result<(), CliError> {
    let (operation, config_path) = parse_args(args)?;
    let config = load_config(&config_path)?;
    let runtime = build_runtime()?;
    let output = runtime.block_on(async {
        let store = connect_store(&config)?;
        execute(operation, store).await
    })?;
    write_output(&output)
}

fn load_config(path: &Utf8Path) -> Result<QueueConfig, CliError> {
    Ok(QueueConfig::load(path)?)
}

fn build_runtime() -> Result<tokio::runtime::Runtime, CliError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::RuntimeInit)
}

async fn execute(operation: Operation, store: PostgresQueueStore) -> Result<Value, CliError> {
    let service: Service = QueueService::new(Arc::new(store), Arc::new(DefaultClock));
    match operation {
        Operation::Migrate => {
            service
                .store()
                .install_schema()
                .await
                .map_err(QueueServiceError::from)?;
            info!("queue schema installed");
            Ok(json!({ "migrated": true }))
        }
        Operation::Push { queue, data } => {
            let name = QueueName::new(queue).map_err(CliError::QueueName)?;
            let value: Value = serde_json::from_str(&data).map_err(CliError::Data)?;
            let id = service.push(name, value, PushOptions::default()).await?;
            Ok(json!({ "task_id": id }))
        }
        Operation::Pull { queue } => {
            let name = queue
                .map(QueueName::new)
                .transpose()
                .map_err(CliError::QueueName)?;
            let outcome = service.pull(name.as_ref()).await?;
            Ok(json!({
                "task_id": outcome.task_id(),
                "name": outcome.claimed.as_ref().map(|claimed| claimed.name.as_str()),
                "priority": outcome.claimed.as_ref().and_then(|claimed| claimed.priority),
                "next_wakeup_secs": outcome.next_wakeup.map(|wait| wait.as_secs_f64()),
            }))
        }
        Operation::Show { id } => {
            let task = service.find(id).await?;
            Ok(json!({ "task": task }))
        }
        Operation::Finish { ids } => {
            let mut finished = Vec::with_capacity(ids.len());
            for id in ids {
                let task = service.finish(id).await?;
                info!(task_id = %id, "task finished by operator");
                finished.push(task);
            }
            Ok(json!({ "tasks": finished }))
        }
        Operation::Copy { ids } => {
            let copies = service.copy(&ids).await?;
            Ok(json!({ "task_ids": copies }))
        }
    }
}

fn write_output(value: &Value) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)
        .map_err(|err| CliError::Output(err.into()))?;
    writeln!(stdout).map_err(CliError::Output)
}
