use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    handlers::{conversations, realtime},
    infra::app_state::AppState,
};

pub const CONVERSATIONS: &str = "/conversations";
pub const CONVERSATION_MESSAGES: &str = "/conversations/{id}/messages";
pub const CONVERSATION_REPLY: &str = "/conversations/{id}/reply";
pub const CONVERSATION_READ: &str = "/conversations/{id}/read";
pub const SUBSCRIPTIONS: &str = "/realtime/subscriptions";

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            CONVERSATIONS,
            get(conversations::list_conversations_handler)
                .post(conversations::start_chat_handler),
        )
        .route(
            CONVERSATION_MESSAGES,
            get(conversations::list_messages_handler),
        )
        .route(CONVERSATION_REPLY, post(conversations::reply_handler))
        .route(CONVERSATION_READ, post(conversations::mark_read_handler))
        .route(SUBSCRIPTIONS, get(realtime::subscriptions_handler))
}
