use std::{fmt, sync::Arc};

use relay_config::Config;
use relay_core::{
    ConversationStore, Dispatcher, FanoutService, OutboundSender,
    SubscriptionManager,
};

use super::app_context::AppContext;

/// Axum router state; cheap to clone into every handler.
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.context)
    }

    pub fn config(&self) -> &Config {
        self.context.config()
    }

    pub fn config_handle(&self) -> Arc<Config> {
        self.context.config_handle()
    }

    pub fn store(&self) -> Arc<dyn ConversationStore> {
        self.context.store()
    }

    pub fn fanout(&self) -> &FanoutService {
        self.context.fanout()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        self.context.fanout().subscriptions()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.context.fanout().dispatcher()
    }

    pub fn outbound(&self) -> Arc<dyn OutboundSender> {
        self.context.outbound()
    }
}
