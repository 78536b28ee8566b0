use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::ConversationId;

/// Notification that a conversation has new data. Ephemeral: never
/// persisted, and subscribers re-read the store to learn what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub conversation_id: ConversationId,
    pub emitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Error)]
pub enum MalformedPayload {
    #[error("empty change payload")]
    Empty,
    #[error("change payload has a blank conversation id")]
    BlankConversation,
    #[error("change payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChangeEvent {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            emitted_at: Utc::now(),
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Encodes the event for the store's notification channel.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a notification payload.
    ///
    /// Accepts the JSON form written by [`ChangeEvent::to_payload`] and also a
    /// bare conversation id, which is what a database trigger doing
    /// `pg_notify('new_message', NEW.conversation_id)` emits.
    pub fn from_payload(payload: &str) -> Result<Self, MalformedPayload> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Err(MalformedPayload::Empty);
        }

        let looks_like_json = trimmed.starts_with('{')
            || trimmed.starts_with('[')
            || trimmed.starts_with('"');
        if !looks_like_json && !trimmed.contains(char::is_whitespace) {
            return Ok(Self::new(ConversationId::new(trimmed)));
        }

        let event: ChangeEvent = serde_json::from_str(trimmed)?;
        if event.conversation_id.as_str().trim().is_empty() {
            return Err(MalformedPayload::BlankConversation);
        }
        Ok(event)
    }
}
