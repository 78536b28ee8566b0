use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{backoff::BackoffPolicy, event_bus::EventBus};
use crate::types::ChangeEvent;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to connect change feed: {0}")]
    Connect(String),
    #[error("change feed connection lost: {0}")]
    Connection(String),
    #[error("failed to publish change notification: {0}")]
    Notify(String),
    #[error("failed to encode change event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Raw notification payloads from one listening connection. The stream
/// yields an error or ends when that connection is lost.
pub type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<String, FeedError>> + Send>>;

/// A backing store's change-notification channel.
#[async_trait]
pub trait ChangeSource: Send + Sync + fmt::Debug + 'static {
    /// Opens a fresh listening connection.
    async fn listen(&self) -> Result<NotificationStream, FeedError>;

    /// Emits one payload on the shared channel, reaching every process
    /// listening on it.
    async fn notify(&self, payload: &str) -> Result<(), FeedError>;

    /// Short backend name for logs and health output.
    fn describe(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedStatus {
    Connecting,
    Listening,
    Reconnecting { attempt: u32 },
    Stopped,
}

/// Bridges a [`ChangeSource`] into the [`EventBus`].
///
/// One feed per process: [`ChangeFeed::start`] spawns the listener task the
/// first time and hands back the same [`ChangeFeedHandle`] afterwards.
#[derive(Debug)]
pub struct ChangeFeed {
    source: Arc<dyn ChangeSource>,
    bus: EventBus,
    backoff: BackoffPolicy,
    handle: OnceLock<ChangeFeedHandle>,
}

impl ChangeFeed {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        bus: EventBus,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            source,
            bus,
            backoff,
            handle: OnceLock::new(),
        }
    }

    /// Starts the feed. Must be called from within a Tokio runtime.
    pub fn start(&self) -> ChangeFeedHandle {
        self.handle.get_or_init(|| self.spawn()).clone()
    }

    pub fn handle(&self) -> Option<&ChangeFeedHandle> {
        self.handle.get()
    }

    pub fn source(&self) -> &Arc<dyn ChangeSource> {
        &self.source
    }

    fn spawn(&self) -> ChangeFeedHandle {
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);
        let reconnects = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();

        let worker = FeedWorker {
            source: Arc::clone(&self.source),
            bus: self.bus.clone(),
            backoff: self.backoff,
            status: status_tx,
            reconnects: Arc::clone(&reconnects),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        ChangeFeedHandle {
            status: status_rx,
            reconnects,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeFeedHandle {
    status: watch::Receiver<FeedStatus>,
    reconnects: Arc<AtomicU64>,
    shutdown: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChangeFeedHandle {
    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    /// Number of reconnect attempts since the feed started.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Whether both handles refer to the same running feed.
    pub fn same_feed(&self, other: &ChangeFeedHandle) -> bool {
        Arc::ptr_eq(&self.task, &other.task)
    }

    /// Waits until the feed reports a status matching `predicate`. Returns
    /// `None` if the feed task has exited first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&FeedStatus) -> bool,
    ) -> Option<FeedStatus> {
        let mut status = self.status.clone();
        status
            .wait_for(|current| predicate(current))
            .await
            .ok()
            .map(|current| *current)
    }

    /// Cancels the feed and waits for its task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "change feed task ended abnormally");
        }
    }
}

struct FeedWorker {
    source: Arc<dyn ChangeSource>,
    bus: EventBus,
    backoff: BackoffPolicy,
    status: watch::Sender<FeedStatus>,
    reconnects: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

enum Session {
    Lost(String),
    Cancelled,
}

impl FeedWorker {
    async fn run(self) {
        let backend = self.source.describe();
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                connected = self.source.listen() => connected,
            };

            match connected {
                Ok(stream) => {
                    if attempt == 0 {
                        info!(backend, "change feed listening");
                    } else {
                        info!(backend, attempt, "change feed reconnected");
                    }
                    attempt = 0;
                    self.status.send_replace(FeedStatus::Listening);

                    match self.pump(stream).await {
                        Session::Cancelled => break,
                        Session::Lost(reason) => {
                            warn!(backend, reason = %reason, "change feed connection lost");
                        }
                    }
                }
                Err(err) => {
                    warn!(backend, attempt, error = %err, "change feed connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            self.status
                .send_replace(FeedStatus::Reconnecting { attempt });

            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                backend,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "change feed reconnecting"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.send_replace(FeedStatus::Stopped);
        debug!(backend, "change feed stopped");
    }

    async fn pump(&self, mut stream: NotificationStream) -> Session {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Session::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(payload)) => self.forward(&payload),
                Some(Err(err)) => return Session::Lost(err.to_string()),
                None => {
                    return Session::Lost(
                        "notification stream closed".to_string(),
                    );
                }
            }
        }
    }

    fn forward(&self, payload: &str) {
        match ChangeEvent::from_payload(payload) {
            Ok(event) => {
                let conversation_id = event.conversation_id.clone();
                let delivered = self.bus.publish(event);
                trace!(conversation_id = %conversation_id, delivered, "change notification forwarded");
            }
            Err(err) => {
                warn!(error = %err, payload, "dropping malformed change payload");
            }
        }
    }
}
