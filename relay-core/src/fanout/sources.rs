//! [`ChangeSource`] backends.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::{PgPool, postgres::PgListener};
use tokio::sync::{broadcast, watch};
use tracing::warn;

use super::change_feed::{ChangeSource, FeedError, NotificationStream};

/// Postgres `LISTEN/NOTIFY` on a single channel. Each [`listen`] call opens
/// one dedicated connection from the pool's connect options.
///
/// [`listen`]: ChangeSource::listen
#[derive(Debug, Clone)]
pub struct PgChangeSource {
    pool: PgPool,
    channel: String,
}

impl PgChangeSource {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn listen(&self) -> Result<NotificationStream, FeedError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|err| FeedError::Connect(err.to_string()))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|err| FeedError::Connect(err.to_string()))?;

        let stream = async_stream::stream! {
            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        yield Ok(notification.payload().to_owned());
                    }
                    Ok(None) => {
                        yield Err(FeedError::Connection(
                            "postgres listener connection closed".to_string(),
                        ));
                        break;
                    }
                    Err(err) => {
                        yield Err(FeedError::Connection(err.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn notify(&self, payload: &str) -> Result<(), FeedError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| FeedError::Notify(err.to_string()))
    }

    fn describe(&self) -> &'static str {
        "postgres"
    }
}

/// Process-local notification channel.
///
/// Behaves like a store connection: payloads reach every open listening
/// stream, and [`drop_connections`](Self::drop_connections) /
/// [`fail_next_connects`](Self::fail_next_connects) reproduce outages.
#[derive(Debug)]
pub struct InMemoryChangeSource {
    notifications: broadcast::Sender<String>,
    generation: watch::Sender<u64>,
    pending_failures: AtomicU32,
    connections: AtomicUsize,
}

impl Default for InMemoryChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChangeSource {
    const CAPACITY: usize = 1024;

    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(Self::CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            notifications,
            generation,
            pending_failures: AtomicU32::new(0),
            connections: AtomicUsize::new(0),
        }
    }

    /// Ends every open listening stream with a connection error.
    pub fn drop_connections(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Makes the next `count` calls to `listen` fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Successful `listen` calls so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

enum LocalEvent {
    Reset,
    Received(Result<String, broadcast::error::RecvError>),
}

#[async_trait]
impl ChangeSource for InMemoryChangeSource {
    async fn listen(&self) -> Result<NotificationStream, FeedError> {
        let failed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(FeedError::Connect(
                "in-memory source refused connection".to_string(),
            ));
        }

        self.connections.fetch_add(1, Ordering::SeqCst);
        let mut receiver = self.notifications.subscribe();
        let mut generation = self.generation.subscribe();

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = generation.changed() => LocalEvent::Reset,
                    received = receiver.recv() => LocalEvent::Received(received),
                };

                match next {
                    LocalEvent::Reset => {
                        yield Err(FeedError::Connection(
                            "connection reset".to_string(),
                        ));
                        break;
                    }
                    LocalEvent::Received(Ok(payload)) => yield Ok(payload),
                    LocalEvent::Received(Err(
                        broadcast::error::RecvError::Lagged(skipped),
                    )) => {
                        warn!(skipped, "in-memory change source lagged");
                    }
                    LocalEvent::Received(Err(
                        broadcast::error::RecvError::Closed,
                    )) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn notify(&self, payload: &str) -> Result<(), FeedError> {
        // No open stream means the notification is lost, as with NOTIFY
        // while nobody is listening.
        let _ = self.notifications.send(payload.to_string());
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "in-memory"
    }
}
