//! Caller proxy that turns method calls into queued tasks.
//!
//! A producer writes `caller.model("sale").call("process", call)` where it
//! would otherwise invoke the method directly. The call is validated against
//! the resolver's allow-list, serialized into a [`TaskPayload`] and pushed;
//! the returned task id is the only result.

use super::queue::{PushOptions, QueueService, QueueServiceError};
use crate::queue::{
    domain::{ContextMap, QueueDomainError, QueueName, Records, TaskId, TaskPayload, UserId},
    ports::{ModelResolver, QueueStore, ResolveError},
};
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Context key selecting the target queue.
pub const QUEUE_NAME_KEY: &str = "queue_name";
/// Context key carrying the advisory priority.
pub const PRIORITY_KEY: &str = "priority";
/// Context key carrying the scheduling delay in seconds.
pub const SCHEDULED_DELAY_KEY: &str = "queue_scheduled_at";
/// Context key carrying the deadline delay in seconds.
pub const EXPECTED_DELAY_KEY: &str = "queue_expected_at";
/// Context key dropped before storage.
pub const CHECK_ACCESS_KEY: &str = "_check_access";
/// Keyword argument selecting non-atomic execution.
pub const ATOMIC_KWARG: &str = "_atomic";

/// Identity and context the producer is acting under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallContext {
    /// Acting user.
    pub user: UserId,
    /// Producer context, queue-control keys included.
    pub context: ContextMap,
}

impl CallContext {
    /// Creates a call context for `user`.
    #[must_use]
    pub const fn new(user: UserId, context: ContextMap) -> Self {
        Self { user, context }
    }

    /// Sets one context entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Arguments of one deferred method call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeferredCall {
    context: CallContext,
    records: Records,
    args: Vec<Value>,
    kwargs: ContextMap,
}

impl DeferredCall {
    /// Creates a model-level call under `context`.
    #[must_use]
    pub fn new(context: CallContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    /// Sets the record receiver(s).
    #[must_use]
    pub fn with_records(mut self, records: impl Into<Records>) -> Self {
        self.records = records.into();
        self
    }

    /// Sets the positional arguments following the receiver.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Sets one keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// Errors returned while enqueueing a deferred call.
#[derive(Debug, Error)]
pub enum CallError {
    /// A queue-control value was malformed.
    #[error(transparent)]
    Domain(#[from] QueueDomainError),
    /// The model or method is not registered.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Pushing the task failed.
    #[error(transparent)]
    Queue(#[from] QueueServiceError),
}

/// Result type for caller operations.
pub type CallResult<T> = Result<T, CallError>;

/// Factory for per-model caller proxies.
pub struct QueueCaller<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    queue: QueueService<S, C>,
    resolver: Arc<dyn ModelResolver>,
}

impl<S, C> QueueCaller<S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    /// Creates a caller pushing through `queue` and validating with
    /// `resolver`.
    #[must_use]
    pub const fn new(queue: QueueService<S, C>, resolver: Arc<dyn ModelResolver>) -> Self {
        Self { queue, resolver }
    }

    /// Returns a proxy for calls on `model`.
    #[must_use]
    pub fn model(&self, model: impl Into<String>) -> ModelCaller<'_, S, C> {
        ModelCaller {
            caller: self,
            model: model.into(),
        }
    }
}

/// Proxy enqueueing calls on one model.
pub struct ModelCaller<'a, S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    caller: &'a QueueCaller<S, C>,
    model: String,
}

impl<S, C> ModelCaller<'_, S, C>
where
    S: QueueStore,
    C: Clock + Send + Sync,
{
    /// Returns the target model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Enqueues `method` with `call` and returns the new task id.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Resolve`] when the model or method is not
    /// registered, [`CallError::Domain`] when a queue-control value is
    /// malformed and [`CallError::Queue`] when the push fails.
    pub async fn call(&self, method: &str, call: DeferredCall) -> CallResult<TaskId> {
        if self.model.trim().is_empty() {
            return Err(QueueDomainError::EmptyModelName.into());
        }
        if method.trim().is_empty() {
            return Err(QueueDomainError::EmptyMethodName.into());
        }
        self.caller.resolver.resolve(&self.model, method)?;

        let DeferredCall {
            context: CallContext { user, mut context },
            records,
            args,
            mut kwargs,
        } = call;
        let now = self.caller.queue.clock().utc();
        let controls = QueueControls::take(&mut context, now)?;
        let atomic = take_atomic(&mut kwargs)?;

        let payload = TaskPayload {
            model: self.model.clone(),
            method: method.to_owned(),
            user,
            context,
            instances: records,
            args,
            kwargs,
            atomic,
        };
        let id = self
            .caller
            .queue
            .push(controls.name.clone(), payload.to_value()?, controls.options)
            .await?;
        debug!(
            task_id = %id,
            queue = %controls.name,
            model = %self.model,
            method,
            "queued deferred call"
        );
        Ok(id)
    }
}

/// Queue-control values removed from the producer context.
struct QueueControls {
    name: QueueName,
    options: PushOptions,
}

impl QueueControls {
    fn take(context: &mut ContextMap, now: DateTime<Utc>) -> Result<Self, QueueDomainError> {
        let name = match context.remove(QUEUE_NAME_KEY) {
            None | Some(Value::Null) => QueueName::default_queue(),
            Some(Value::String(raw)) => QueueName::new(raw)?,
            Some(other) => return Err(invalid(QUEUE_NAME_KEY, "expected a string", &other)),
        };
        let priority = match context.remove(PRIORITY_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_i64()
                    .and_then(|raw| i32::try_from(raw).ok())
                    .ok_or_else(|| invalid(PRIORITY_KEY, "expected a 32-bit integer", &value))?,
            ),
        };
        let scheduled_at = take_instant(context, SCHEDULED_DELAY_KEY, now)?;
        let expected_at = take_instant(context, EXPECTED_DELAY_KEY, now)?;
        context.remove(CHECK_ACCESS_KEY);

        Ok(Self {
            name,
            options: PushOptions {
                scheduled_at,
                expected_at,
                priority,
            },
        })
    }
}

/// Removes a relative delay and anchors it at `now`.
fn take_instant(
    context: &mut ContextMap,
    key: &'static str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, QueueDomainError> {
    let raw = context.get(key).cloned().unwrap_or(Value::Null);
    take_delay(context, key)?
        .map(|delay| {
            now.checked_add_signed(delay)
                .ok_or_else(|| invalid(key, "delay out of range", &raw))
        })
        .transpose()
}

/// Removes a relative delay in seconds, integer or fractional.
fn take_delay(
    context: &mut ContextMap,
    key: &'static str,
) -> Result<Option<TimeDelta>, QueueDomainError> {
    let Some(value) = context.remove(key) else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }
    if let Some(seconds) = value.as_i64() {
        return TimeDelta::try_seconds(seconds)
            .map(Some)
            .ok_or_else(|| invalid(key, "delay out of range", &value));
    }
    let seconds = value
        .as_f64()
        .ok_or_else(|| invalid(key, "expected a number of seconds", &value))?;
    let magnitude = std::time::Duration::try_from_secs_f64(seconds.abs())
        .ok()
        .and_then(|duration| TimeDelta::from_std(duration).ok())
        .ok_or_else(|| invalid(key, "delay out of range", &value))?;
    Ok(Some(if seconds.is_sign_negative() {
        -magnitude
    } else {
        magnitude
    }))
}

fn take_atomic(kwargs: &mut ContextMap) -> Result<bool, QueueDomainError> {
    match kwargs.remove(ATOMIC_KWARG) {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(atomic)) => Ok(atomic),
        Some(other) => Err(invalid(ATOMIC_KWARG, "expected a boolean", &other)),
    }
}

fn invalid(key: &'static str, reason: &str, value: &Value) -> QueueDomainError {
    QueueDomainError::InvalidContextValue {
        key,
        reason: format!("{reason}, got {value}"),
    }
}
