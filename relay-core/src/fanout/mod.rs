//! Realtime notification fan-out.
//!
//! Control flow: writer → [`Dispatcher`] → [`ChangeFeed`] (cross-process,
//! through the store's notification channel) → [`EventBus`] (in-process) →
//! [`SubscriptionManager`] → connected client.
//!
//! [`FanoutService`] wires these together once in the composition root.

pub mod backoff;
pub mod change_feed;
pub mod dispatcher;
pub mod event_bus;
pub mod sources;
pub mod subscriptions;

use std::{sync::Arc, time::Duration};

use tracing::info;

pub use backoff::BackoffPolicy;
pub use change_feed::{
    ChangeFeed, ChangeFeedHandle, ChangeSource, FeedError, FeedStatus,
    NotificationStream,
};
pub use dispatcher::Dispatcher;
pub use event_bus::{EventBus, Listener, ListenerHandle, ListenerId};
pub use sources::{InMemoryChangeSource, PgChangeSource};
pub use subscriptions::{
    EventStream, PollOutcome, PollResolution, StreamMessage,
    SubscriptionError, SubscriptionKind, SubscriptionManager,
    SubscriptionRecord, SubscriptionSnapshot, WaiterState,
};

use crate::store::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanoutSettings {
    pub heartbeat_interval: Duration,
    /// Upper bound for a single long-poll wait.
    pub poll_ceiling: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            poll_ceiling: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// The assembled fan-out core shared by every handler.
#[derive(Debug, Clone)]
pub struct FanoutService {
    bus: EventBus,
    subscriptions: Arc<SubscriptionManager>,
    dispatcher: Dispatcher,
    feed: Option<Arc<ChangeFeed>>,
}

impl FanoutService {
    /// Single-process mode: writers publish straight into the local bus.
    pub fn single_process(
        store: Arc<dyn ConversationStore>,
        settings: FanoutSettings,
    ) -> Self {
        let bus = EventBus::new();
        info!("fan-out running in single-process mode");
        Self {
            subscriptions: Arc::new(Self::manager(&bus, store, &settings)),
            dispatcher: Dispatcher::direct(bus.clone()),
            bus,
            feed: None,
        }
    }

    /// Multi-process mode: writers notify through `source` and the change
    /// feed republishes into the local bus. Starts the feed; must be called
    /// from within a Tokio runtime.
    pub fn with_change_feed(
        store: Arc<dyn ConversationStore>,
        source: Arc<dyn ChangeSource>,
        settings: FanoutSettings,
    ) -> Self {
        let bus = EventBus::new();
        let feed = Arc::new(ChangeFeed::new(
            Arc::clone(&source),
            bus.clone(),
            settings.backoff,
        ));
        feed.start();
        info!(backend = source.describe(), "fan-out running through change feed");

        Self {
            subscriptions: Arc::new(Self::manager(&bus, store, &settings)),
            dispatcher: Dispatcher::via_feed(source),
            bus,
            feed: Some(feed),
        }
    }

    fn manager(
        bus: &EventBus,
        store: Arc<dyn ConversationStore>,
        settings: &FanoutSettings,
    ) -> SubscriptionManager {
        SubscriptionManager::new(
            bus.clone(),
            store,
            settings.heartbeat_interval,
            settings.poll_ceiling,
        )
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn feed(&self) -> Option<&ChangeFeedHandle> {
        self.feed.as_ref().and_then(|feed| feed.handle())
    }

    /// Ends open subscriptions, then stops the change feed.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown();
        if let Some(handle) = self.feed() {
            handle.shutdown().await;
        }
    }
}
