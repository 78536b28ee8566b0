pub mod v1;

use axum::{Router, routing::get};

use crate::{
    handlers::{health, realtime, webhooks},
    infra::app_state::AppState,
};

pub const PING: &str = "/ping";
pub const HEALTH: &str = "/health";
/// SSE stream of change events for one conversation.
pub const STREAM: &str = "/stream";
/// Long-poll for messages newer than `since`.
pub const POLL: &str = "/poll";
/// Meta webhook callback (verification handshake and deliveries).
pub const META_WEBHOOK: &str = "/webhooks/meta";

/// Every route the server exposes, without middleware or state.
pub fn create_app_router() -> Router<AppState> {
    Router::new()
        .route(PING, get(health::ping_handler))
        .route(HEALTH, get(health::health_handler))
        .route(STREAM, get(realtime::stream_handler))
        .route(POLL, get(realtime::poll_handler))
        .route(
            META_WEBHOOK,
            get(webhooks::verify_handler).post(webhooks::ingest_handler),
        )
        .merge(create_api_router())
}

/// Create the main API router with all versions
pub fn create_api_router() -> Router<AppState> {
    Router::new().nest("/api/v1", v1::create_v1_router())
}
