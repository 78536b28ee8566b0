use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::event_bus::EventBus;
use crate::error::StoreError;
use crate::store::ConversationStore;
use crate::types::{ChangeEvent, ConversationId, Message, SubscriptionId};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("subscription manager is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriptionKind {
    Stream,
    LongPoll { deadline: DateTime<Utc> },
}

/// Bookkeeping for one live client subscription. Owned by the manager,
/// never by the transport.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub kind: SubscriptionKind,
    cancel: CancellationToken,
}

impl SubscriptionRecord {
    pub fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: self.id,
            conversation_id: self.conversation_id.clone(),
            created_at: self.created_at,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: SubscriptionId,
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SubscriptionKind,
}

/// Long-poll waiter lifecycle. `Pending` moves to exactly one terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    Pending,
    ResolvedByEvent,
    ResolvedByTimeout,
}

impl WaiterState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WaiterState::Pending)
    }

    /// Returns `false` and leaves the state alone when already terminal.
    pub fn resolve(&mut self, next: WaiterState) -> bool {
        if self.is_terminal() || next == WaiterState::Pending {
            return false;
        }
        *self = next;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollResolution {
    /// Rows newer than `since` were already stored.
    Immediate,
    /// A change event arrived while waiting.
    Event,
    /// Nothing arrived before the deadline.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOutcome {
    pub resolution: PollResolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ChangeEvent>,
    pub messages: Vec<Message>,
}

impl PollOutcome {
    pub fn immediate(messages: Vec<Message>) -> Self {
        Self {
            resolution: PollResolution::Immediate,
            event: None,
            messages,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            resolution: PollResolution::Timeout,
            event: None,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Update(ChangeEvent),
    Heartbeat,
}

/// Removes the record when the owning stream or waiter goes away.
struct Registration {
    id: SubscriptionId,
    conversation_id: ConversationId,
    records: Arc<DashMap<SubscriptionId, SubscriptionRecord>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.records.remove(&self.id).is_some() {
            debug!(
                subscription_id = %self.id,
                conversation_id = %self.conversation_id,
                "subscription released"
            );
        }
    }
}

/// Live updates for one conversation. Dropping it unsubscribes.
pub struct EventStream {
    id: SubscriptionId,
    conversation_id: ConversationId,
    inner: Pin<Box<dyn Stream<Item = StreamMessage> + Send>>,
}

impl EventStream {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

impl Stream for EventStream {
    type Item = StreamMessage;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum StreamStep {
    Update(ChangeEvent),
    Heartbeat,
    Closed,
}

/// Tracks client subscriptions and feeds them from the [`EventBus`].
#[derive(Debug)]
pub struct SubscriptionManager {
    bus: EventBus,
    store: Arc<dyn ConversationStore>,
    records: Arc<DashMap<SubscriptionId, SubscriptionRecord>>,
    heartbeat_interval: Duration,
    poll_ceiling: Duration,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    pub fn new(
        bus: EventBus,
        store: Arc<dyn ConversationStore>,
        heartbeat_interval: Duration,
        poll_ceiling: Duration,
    ) -> Self {
        Self {
            bus,
            store,
            records: Arc::new(DashMap::new()),
            heartbeat_interval,
            poll_ceiling,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn poll_ceiling(&self) -> Duration {
        self.poll_ceiling
    }

    fn register(
        &self,
        conversation_id: &ConversationId,
        kind: SubscriptionKind,
        cancel: CancellationToken,
    ) -> Registration {
        let id = SubscriptionId::new();
        self.records.insert(
            id,
            SubscriptionRecord {
                id,
                conversation_id: conversation_id.clone(),
                created_at: Utc::now(),
                kind,
                cancel,
            },
        );
        trace!(subscription_id = %id, conversation_id = %conversation_id, ?kind, "subscription opened");

        Registration {
            id,
            conversation_id: conversation_id.clone(),
            records: Arc::clone(&self.records),
        }
    }

    /// Opens a live stream for `conversation_id`.
    ///
    /// Every change event yields one [`StreamMessage::Update`]. While idle,
    /// a [`StreamMessage::Heartbeat`] is produced every heartbeat interval,
    /// the first one a full interval after opening. The stream ends when the
    /// conversation is closed or the manager shuts down.
    pub fn open_stream(&self, conversation_id: &ConversationId) -> EventStream {
        let mut listener = self.bus.subscribe(conversation_id);
        let cancel = self.shutdown.child_token();
        let registration = self.register(
            conversation_id,
            SubscriptionKind::Stream,
            cancel.clone(),
        );
        let id = registration.id;
        let period = self.heartbeat_interval;

        let inner = async_stream::stream! {
            let _registration = registration;
            let mut heartbeat =
                tokio::time::interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => StreamStep::Closed,
                    event = listener.recv() => match event {
                        Some(event) => StreamStep::Update(event),
                        None => StreamStep::Closed,
                    },
                    _ = heartbeat.tick() => StreamStep::Heartbeat,
                };

                match step {
                    StreamStep::Update(event) => yield StreamMessage::Update(event),
                    StreamStep::Heartbeat => yield StreamMessage::Heartbeat,
                    StreamStep::Closed => break,
                }
            }
        };

        EventStream {
            id,
            conversation_id: conversation_id.clone(),
            inner: Box::pin(inner),
        }
    }

    /// Long-poll for messages newer than `since`.
    ///
    /// The listener is registered before the store is read so a write that
    /// lands in between still wakes the waiter. `timeout` is clamped to the
    /// poll ceiling.
    pub async fn wait_for_update(
        &self,
        conversation_id: &ConversationId,
        since: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<PollOutcome, SubscriptionError> {
        if self.shutdown.is_cancelled() {
            return Err(SubscriptionError::ShuttingDown);
        }

        let timeout = timeout.min(self.poll_ceiling);
        let mut listener = self.bus.subscribe(conversation_id);

        let existing = self
            .store
            .list_messages_since(conversation_id, since)
            .await?;
        if !existing.is_empty() {
            return Ok(PollOutcome::immediate(existing));
        }

        let cancel = self.shutdown.child_token();
        let deadline =
            Utc::now() + TimeDelta::from_std(timeout).unwrap_or(TimeDelta::zero());
        let registration = self.register(
            conversation_id,
            SubscriptionKind::LongPoll { deadline },
            cancel.clone(),
        );

        let woke_with = tokio::select! {
            event = listener.recv() => event,
            _ = tokio::time::sleep(timeout) => None,
            _ = cancel.cancelled() => None,
        };
        drop(listener);

        let mut state = WaiterState::Pending;
        let outcome = match woke_with {
            Some(event) => {
                state.resolve(WaiterState::ResolvedByEvent);
                let messages = self
                    .store
                    .list_messages_since(conversation_id, since)
                    .await?;
                PollOutcome {
                    resolution: PollResolution::Event,
                    event: Some(event),
                    messages,
                }
            }
            None => {
                state.resolve(WaiterState::ResolvedByTimeout);
                PollOutcome::timed_out()
            }
        };

        trace!(subscription_id = %registration.id, ?state, "long-poll resolved");
        drop(registration);
        Ok(outcome)
    }

    /// Cancels every subscription on `conversation_id`; returns how many
    /// were signalled.
    pub fn close_conversation(&self, conversation_id: &ConversationId) -> usize {
        let mut closed = 0;
        for record in self.records.iter() {
            if &record.conversation_id == conversation_id {
                record.cancel.cancel();
                closed += 1;
            }
        }
        closed
    }

    /// Cancels all current subscriptions and refuses new long-polls.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn active_count(&self) -> usize {
        self.records.len()
    }

    pub fn active_for(&self, conversation_id: &ConversationId) -> usize {
        self.records
            .iter()
            .filter(|record| &record.conversation_id == conversation_id)
            .count()
    }

    pub fn snapshot(&self) -> Vec<SubscriptionSnapshot> {
        let mut snapshot: Vec<_> = self
            .records
            .iter()
            .map(|record| record.snapshot())
            .collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshot
    }
}
