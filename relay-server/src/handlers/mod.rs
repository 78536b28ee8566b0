//! HTTP request handlers organized by functionality

pub mod conversations;
pub mod health;
pub mod realtime;
pub mod webhooks;

use relay_core::ConversationId;

use crate::infra::errors::{AppError, AppResult};

pub(crate) fn parse_conversation_id(raw: &str) -> AppResult<ConversationId> {
    ConversationId::parse(raw)
        .ok_or_else(|| AppError::bad_request("conversation id is required"))
}
