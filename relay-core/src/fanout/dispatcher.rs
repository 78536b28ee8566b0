use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use super::{change_feed::ChangeSource, event_bus::EventBus};
use crate::types::{ChangeEvent, ConversationId};

#[derive(Clone)]
enum Route {
    /// Single process: publish straight into the local bus.
    Direct(EventBus),
    /// Through the store's notification channel so every process sees it.
    Feed(Arc<dyn ChangeSource>),
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct(_) => f.write_str("Direct"),
            Route::Feed(source) => {
                f.debug_tuple("Feed").field(&source.describe()).finish()
            }
        }
    }
}

/// Entry point for writers. Call [`Dispatcher::notify_changed`] only after
/// the message write has committed.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    route: Route,
}

impl Dispatcher {
    pub fn direct(bus: EventBus) -> Self {
        Self {
            route: Route::Direct(bus),
        }
    }

    pub fn via_feed(source: Arc<dyn ChangeSource>) -> Self {
        Self {
            route: Route::Feed(source),
        }
    }

    /// Best-effort: failures are logged and never reach the writer.
    pub async fn notify_changed(&self, conversation_id: &ConversationId) {
        self.dispatch(ChangeEvent::new(conversation_id.clone())).await;
    }

    pub async fn notify_with_summary(
        &self,
        conversation_id: &ConversationId,
        summary: impl Into<String>,
    ) {
        let event =
            ChangeEvent::new(conversation_id.clone()).with_summary(summary);
        self.dispatch(event).await;
    }

    async fn dispatch(&self, event: ChangeEvent) {
        match &self.route {
            Route::Direct(bus) => {
                let conversation_id = event.conversation_id.clone();
                let delivered = bus.publish(event);
                debug!(conversation_id = %conversation_id, delivered, "change dispatched locally");
            }
            Route::Feed(source) => {
                let payload = match event.to_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(
                            conversation_id = %event.conversation_id,
                            error = %err,
                            "failed to encode change event"
                        );
                        return;
                    }
                };

                match source.notify(&payload).await {
                    Ok(()) => {
                        debug!(conversation_id = %event.conversation_id, "change dispatched to feed");
                    }
                    Err(err) => {
                        warn!(
                            conversation_id = %event.conversation_id,
                            error = %err,
                            "change notification failed"
                        );
                    }
                }
            }
        }
    }
}
