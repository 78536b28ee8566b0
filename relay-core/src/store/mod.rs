//! Conversation storage.
//!
//! Handlers and the fan-out core only see [`ConversationStore`]; the binary
//! picks [`PostgresConversationStore`] when a database URL is configured and
//! falls back to [`InMemoryConversationStore`] otherwise.

mod memory;
mod postgres;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::types::{
    Channel, Conversation, ConversationId, Message, NewConversation,
    NewMessage,
};

pub use memory::InMemoryConversationStore;
pub use postgres::PostgresConversationStore;

#[async_trait]
pub trait ConversationStore: Send + Sync + fmt::Debug {
    /// Creates the conversation for `(external_id, channel)` or, when it
    /// already exists, advances its `updated_at` to `seen_at`. A late
    /// `seen_at` never moves `updated_at` backwards.
    async fn upsert_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation>;

    /// Inserts a new conversation; an existing `(external_id, channel)` row
    /// is returned unchanged.
    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> StoreResult<Option<Conversation>>;

    async fn find_conversation(
        &self,
        external_id: &str,
        channel: Channel,
    ) -> StoreResult<Option<Conversation>>;

    /// Most recently updated first.
    async fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>>;

    /// Sets `last_read_at`; returns `false` when the conversation is unknown.
    async fn mark_read(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Stores the message with its timestamp truncated to milliseconds and
    /// advances the parent's `updated_at` in the same write.
    ///
    /// Fails with [`StoreError::ConversationNotFound`](crate::StoreError)
    /// when the parent conversation does not exist.
    async fn create_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// All messages of a conversation, ascending by timestamp.
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Vec<Message>>;

    /// Messages with `timestamp > since`, ascending by timestamp.
    async fn list_messages_since(
        &self,
        conversation_id: &ConversationId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Message>>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> StoreResult<()>;
}
