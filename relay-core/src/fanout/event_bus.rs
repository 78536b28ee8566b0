use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{ChangeEvent, ConversationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Cancellation capability for one registered listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    id: ListenerId,
    conversation_id: ConversationId,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

type ListenerMap = HashMap<ListenerId, mpsc::UnboundedSender<ChangeEvent>>;

#[derive(Debug, Default)]
struct Registry {
    listeners: DashMap<ConversationId, ListenerMap>,
    next_id: AtomicU64,
}

/// In-process publish/subscribe keyed by conversation id.
///
/// Each conversation owns one entry in a sharded map, so a publish only
/// locks the shard of its target conversation. Events published while no
/// listener is registered are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, conversation_id: &ConversationId) -> Listener {
        let id = ListenerId(
            self.registry.next_id.fetch_add(1, Ordering::Relaxed) + 1,
        );
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry
            .listeners
            .entry(conversation_id.clone())
            .or_default()
            .insert(id, tx);

        trace!(conversation_id = %conversation_id, listener = id.0, "listener registered");

        Listener {
            handle: ListenerHandle {
                id,
                conversation_id: conversation_id.clone(),
            },
            receiver: rx,
            bus: self.clone(),
        }
    }

    /// Removes a listener. Returns `false` when it was already gone.
    pub fn unsubscribe(&self, handle: &ListenerHandle) -> bool {
        let removed = match self
            .registry
            .listeners
            .get_mut(&handle.conversation_id)
        {
            Some(mut listeners) => listeners.remove(&handle.id).is_some(),
            None => false,
        };

        self.registry
            .listeners
            .remove_if(&handle.conversation_id, |_, listeners| {
                listeners.is_empty()
            });

        removed
    }

    /// Delivers `event` to every listener registered for its conversation
    /// and returns how many were reached. Never blocks on a slow consumer.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let (delivered, drained) = match self
            .registry
            .listeners
            .get_mut(&event.conversation_id)
        {
            Some(mut listeners) => {
                listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
                (listeners.len(), listeners.is_empty())
            }
            None => (0, false),
        };

        if drained {
            self.registry
                .listeners
                .remove_if(&event.conversation_id, |_, listeners| {
                    listeners.is_empty()
                });
        }

        trace!(conversation_id = %event.conversation_id, delivered, "change event published");
        delivered
    }

    pub fn listener_count(&self, conversation_id: &ConversationId) -> usize {
        self.registry
            .listeners
            .get(conversation_id)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Number of conversations with at least one listener.
    pub fn conversation_count(&self) -> usize {
        self.registry.listeners.len()
    }
}

/// Receiving side of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Listener {
    handle: ListenerHandle,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    bus: EventBus,
}

impl Listener {
    pub fn handle(&self) -> &ListenerHandle {
        &self.handle
    }

    /// Waits for the next event. Resolves to `None` once the listener has
    /// been unsubscribed and its queue drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.handle);
    }
}
