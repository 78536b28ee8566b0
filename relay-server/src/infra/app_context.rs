use std::{fmt, sync::Arc};

use relay_config::Config;
use relay_core::{ConversationStore, FanoutService, OutboundSender};

/// Long-lived resources assembled once in the composition root.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    store: Arc<dyn ConversationStore>,
    fanout: FanoutService,
    outbound: Arc<dyn OutboundSender>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("store", &self.store)
            .field("outbound", &self.outbound)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ConversationStore>,
        fanout: FanoutService,
        outbound: Arc<dyn OutboundSender>,
    ) -> Self {
        Self {
            config,
            store,
            fanout,
            outbound,
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_handle(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn store(&self) -> Arc<dyn ConversationStore> {
        Arc::clone(&self.store)
    }

    pub fn fanout(&self) -> &FanoutService {
        &self.fanout
    }

    pub fn outbound(&self) -> Arc<dyn OutboundSender> {
        Arc::clone(&self.outbound)
    }
}
