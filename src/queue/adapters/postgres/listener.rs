//! `LISTEN`-based push notifications for idle workers.

use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::queue::{
    domain::QueueName,
    ports::{ListenerError, ListenerResult, QueueListener},
};

/// Default interval between socket polls while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Listener holding a dedicated session subscribed to the queue channel.
///
/// `LISTEN` is session-scoped, so the connection is established directly
/// rather than borrowed from the pool. A session that fails is dropped and
/// the next wait subscribes again.
pub struct PostgresQueueListener {
    database_url: String,
    channel: String,
    session: Arc<Mutex<Option<PgConnection>>>,
    queue: Option<QueueName>,
    poll_interval: Duration,
}

impl std::fmt::Debug for PostgresQueueListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueueListener")
            .field("channel", &self.channel)
            .field("queue", &self.queue)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PostgresQueueListener {
    /// Connects to `database_url` and subscribes to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Connection`] when the connection or the
    /// `LISTEN` statement fails.
    pub async fn connect(database_url: &str, channel: &str) -> ListenerResult<Self> {
        let url = database_url.to_owned();
        let name = channel.to_owned();
        let connection = tokio::task::spawn_blocking(move || subscribe(&url, &name))
            .await
            .map_err(ListenerError::connection)??;

        debug!(channel, "listening for queue notifications");
        Ok(Self {
            database_url: database_url.to_owned(),
            channel: channel.to_owned(),
            session: Arc::new(Mutex::new(Some(connection))),
            queue: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Only wakes for pushes onto `queue`.
    #[must_use]
    pub fn for_queue(mut self, queue: Option<QueueName>) -> Self {
        self.queue = queue;
        self
    }

    /// Overrides the socket poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Reads pending notifications once; `true` if one matched.
    ///
    /// A fresh subscription also reports `true`: pushes sent while the
    /// session was down are lost, so the caller should pull.
    async fn poll(&self) -> ListenerResult<bool> {
        let session = Arc::clone(&self.session);
        let url = self.database_url.clone();
        let channel = self.channel.clone();
        let queue = self.queue.clone();

        tokio::task::spawn_blocking(move || {
            let mut slot = session
                .lock()
                .map_err(|err| ListenerError::connection(std::io::Error::other(err.to_string())))?;
            let (mut connection, resubscribed) = match slot.take() {
                Some(connection) => (connection, false),
                None => {
                    let connection = subscribe(&url, &channel)?;
                    info!(channel = %channel, "resubscribed to queue notifications");
                    (connection, true)
                }
            };
            let polled = poll_matching(&mut connection, queue.as_ref());
            if polled.is_ok() {
                *slot = Some(connection);
            }
            polled.map(|matched| matched || resubscribed)
        })
        .await
        .map_err(ListenerError::connection)?
    }
}

fn subscribe(database_url: &str, channel: &str) -> ListenerResult<PgConnection> {
    let mut connection = PgConnection::establish(database_url).map_err(ListenerError::connection)?;
    diesel::sql_query(format!("LISTEN {}", quote_identifier(channel)))
        .execute(&mut connection)
        .map_err(ListenerError::connection)?;
    Ok(connection)
}

/// Quotes a channel name as a `PostgreSQL` identifier.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Consumes every pending notification; `true` if one matched `queue`.
fn poll_matching(
    connection: &mut PgConnection,
    queue: Option<&QueueName>,
) -> ListenerResult<bool> {
    // Any round-trip makes libpq read queued notifications.
    diesel::sql_query("SELECT 1")
        .execute(connection)
        .map_err(ListenerError::connection)?;
    let mut matched = false;
    for received in connection.notifications_iter() {
        let notification = received.map_err(ListenerError::connection)?;
        if queue.is_none_or(|wanted| notification.payload == wanted.as_str()) {
            matched = true;
        }
    }
    Ok(matched)
}

#[async_trait]
impl QueueListener for PostgresQueueListener {
    /// Polls the session every poll interval until a match or the timeout.
    ///
    /// Each poll is a short blocking step, so dropping the future stops the
    /// wait after at most one poll.
    async fn wait(&self, timeout: Duration) -> ListenerResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll().await? {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}
