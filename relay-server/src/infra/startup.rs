use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use relay_core::FeedStatus;
use tracing::{info, warn};

use crate::infra::{app_context::AppContext, app_state::AppState};

/// How long startup waits for the change feed before serving anyway.
const FEED_READY_GRACE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, context: Arc<AppContext>, state: &AppState) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, context: Arc<AppContext>, _state: &AppState) -> Result<()> {
        if let Err(err) = context.store().ping().await {
            warn!(error = %err, "conversation store did not answer the startup ping");
        }

        let Some(feed) = context.fanout().feed().cloned() else {
            return Ok(());
        };

        let ready = tokio::time::timeout(
            FEED_READY_GRACE,
            feed.wait_for(|status| matches!(status, FeedStatus::Listening)),
        )
        .await;

        match ready {
            Ok(Some(_)) => info!("change feed listening"),
            _ => warn!(
                status = ?feed.status(),
                "change feed not listening yet; realtime updates start once it connects"
            ),
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _context: Arc<AppContext>, _state: &AppState) -> Result<()> {
        Ok(())
    }
}
