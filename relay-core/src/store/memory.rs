use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    Channel, Conversation, ConversationId, Message, NewConversation,
    NewMessage, truncate_to_millis,
};

/// Process-local store used in single-process mode and in tests.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: HashMap<ConversationId, Conversation>,
    by_external: HashMap<(String, Channel), ConversationId>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

impl MemoryState {
    fn insert_conversation(
        &mut self,
        conversation: NewConversation,
    ) -> Conversation {
        let record = Conversation {
            id: ConversationId::generate(),
            channel: conversation.channel,
            external_id: conversation.external_id,
            source_id: conversation.source_id,
            customer_name: conversation.customer_name,
            updated_at: conversation.seen_at,
            last_read_at: None,
        };
        self.by_external.insert(
            (record.external_id.clone(), record.channel),
            record.id.clone(),
        );
        self.conversations.insert(record.id.clone(), record.clone());
        record
    }

    fn existing_id(&self, external_id: &str, channel: Channel) -> Option<ConversationId> {
        self.by_external
            .get(&(external_id.to_string(), channel))
            .cloned()
    }
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn upsert_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation> {
        let mut state = self.state.write().await;
        let existing =
            state.existing_id(&conversation.external_id, conversation.channel);
        match existing.and_then(|id| state.conversations.get_mut(&id)) {
            Some(record) => {
                record.updated_at = record.updated_at.max(conversation.seen_at);
                Ok(record.clone())
            }
            None => Ok(state.insert_conversation(conversation)),
        }
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation> {
        let mut state = self.state.write().await;
        let existing =
            state.existing_id(&conversation.external_id, conversation.channel);
        if let Some(record) =
            existing.and_then(|id| state.conversations.get(&id))
        {
            return Ok(record.clone());
        }
        Ok(state.insert_conversation(conversation))
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> StoreResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state.conversations.get(id).cloned())
    }

    async fn find_conversation(
        &self,
        external_id: &str,
        channel: Channel,
    ) -> StoreResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .existing_id(external_id, channel)
            .and_then(|id| state.conversations.get(&id))
            .cloned())
    }

    async fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> =
            state.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit);
        Ok(conversations)
    }

    async fn mark_read(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(match state.conversations.get_mut(id) {
            Some(record) => {
                record.last_read_at = Some(at);
                true
            }
            None => false,
        })
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut state = self.state.write().await;
        let timestamp = truncate_to_millis(message.timestamp);
        match state.conversations.get_mut(&message.conversation_id) {
            Some(conversation) => {
                conversation.updated_at = conversation.updated_at.max(timestamp);
            }
            None => {
                return Err(StoreError::ConversationNotFound(
                    message.conversation_id,
                ));
            }
        }

        let record = Message {
            id: Uuid::now_v7(),
            conversation_id: message.conversation_id,
            direction: message.direction,
            text: message.text,
            timestamp,
        };
        let thread = state
            .messages
            .entry(record.conversation_id.clone())
            .or_default();
        // Keep the thread sorted; webhooks may deliver out of order.
        let position =
            thread.partition_point(|existing| existing.timestamp <= record.timestamp);
        thread.insert(position, record.clone());
        Ok(record)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages_since(
        &self,
        conversation_id: &ConversationId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(conversation_id)
            .map(|thread| {
                thread
                    .iter()
                    .filter(|message| message.timestamp > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn whatsapp(external_id: &str, seen_at: DateTime<Utc>) -> NewConversation {
        NewConversation {
            channel: Channel::WhatsApp,
            external_id: external_id.to_string(),
            source_id: Some("phone-1".to_string()),
            customer_name: Some("Rana".to_string()),
            seen_at,
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_bumps_updated_at() {
        let store = InMemoryConversationStore::new();
        let created = store
            .upsert_conversation(whatsapp("9613000000", at_millis(1_000)))
            .await
            .unwrap();
        let bumped = store
            .upsert_conversation(whatsapp("9613000000", at_millis(5_000)))
            .await
            .unwrap();

        assert_eq!(created.id, bumped.id);
        assert_eq!(bumped.updated_at, at_millis(5_000));
        assert_eq!(store.list_conversations(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn late_upsert_keeps_newer_updated_at() {
        let store = InMemoryConversationStore::new();
        store
            .upsert_conversation(whatsapp("9613000001", at_millis(5_000)))
            .await
            .unwrap();
        let redelivered = store
            .upsert_conversation(whatsapp("9613000001", at_millis(1_000)))
            .await
            .unwrap();

        assert_eq!(redelivered.updated_at, at_millis(5_000));
    }

    #[tokio::test]
    async fn create_message_advances_conversation_and_truncates() {
        let store = InMemoryConversationStore::new();
        let conversation = store
            .upsert_conversation(whatsapp("9613000002", at_millis(1_000)))
            .await
            .unwrap();

        let mut precise = NewMessage::outbound(
            conversation.id.clone(),
            "on my way",
            at_millis(0),
        );
        precise.timestamp =
            DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let stored = store.create_message(precise).await.unwrap();
        assert_eq!(stored.timestamp, at_millis(1_700_000_000_123));

        let reloaded = store
            .get_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.updated_at, stored.timestamp);

        let again = store
            .list_messages_since(
                &conversation.id,
                at_millis(stored.timestamp_millis()),
            )
            .await
            .unwrap();
        assert!(again.is_empty());

        // An older inbound message does not move the conversation back.
        store
            .create_message(NewMessage::inbound(
                conversation.id.clone(),
                "late",
                at_millis(2_000),
            ))
            .await
            .unwrap();
        let reloaded = store
            .get_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.updated_at, stored.timestamp);
    }

    #[tokio::test]
    async fn same_external_id_on_other_channel_is_distinct() {
        let store = InMemoryConversationStore::new();
        let wa = store
            .upsert_conversation(whatsapp("42", at_millis(1_000)))
            .await
            .unwrap();
        let mut fb = whatsapp("42", at_millis(1_000));
        fb.channel = Channel::Messenger;
        let fb = store.upsert_conversation(fb).await.unwrap();

        assert_ne!(wa.id, fb.id);
    }

    #[tokio::test]
    async fn create_conversation_returns_existing_untouched() {
        let store = InMemoryConversationStore::new();
        let first = store
            .create_conversation(whatsapp("7", at_millis(1_000)))
            .await
            .unwrap();
        let second = store
            .create_conversation(whatsapp("7", at_millis(9_000)))
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn list_conversations_orders_by_recency_and_limits() {
        let store = InMemoryConversationStore::new();
        for (idx, external) in ["a", "b", "c"].iter().enumerate() {
            store
                .upsert_conversation(whatsapp(external, at_millis(idx as i64 * 1_000)))
                .await
                .unwrap();
        }

        let listed = store.list_conversations(2).await.unwrap();
        let externals: Vec<_> =
            listed.iter().map(|c| c.external_id.as_str()).collect();
        assert_eq!(externals, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn messages_since_is_strictly_newer_and_ordered() {
        let store = InMemoryConversationStore::new();
        let conversation = store
            .upsert_conversation(whatsapp("1", at_millis(0)))
            .await
            .unwrap();
        for ms in [2_000, 1_000, 1_500] {
            store
                .create_message(NewMessage::inbound(
                    conversation.id.clone(),
                    format!("m{ms}"),
                    at_millis(ms),
                ))
                .await
                .unwrap();
        }

        let newer = store
            .list_messages_since(&conversation.id, at_millis(1_000))
            .await
            .unwrap();
        let texts: Vec<_> = newer.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m1500", "m2000"]);
        assert!(newer.iter().all(|m| m.direction == Direction::In));

        let all = store.list_messages(&conversation.id).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text, "m1000");
    }

    #[tokio::test]
    async fn create_message_requires_conversation() {
        let store = InMemoryConversationStore::new();
        let err = store
            .create_message(NewMessage::outbound(
                ConversationId::new("missing"),
                "hello",
                at_millis(1),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn mark_read_reports_unknown_ids() {
        let store = InMemoryConversationStore::new();
        let missing = ConversationId::new("missing");
        assert!(!store.mark_read(&missing, at_millis(1)).await.unwrap());

        let conversation = store
            .upsert_conversation(whatsapp("1", at_millis(10)))
            .await
            .unwrap();
        assert!(conversation.has_unread());
        assert!(store.mark_read(&conversation.id, at_millis(20)).await.unwrap());
        let reloaded = store
            .get_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.last_read_at, Some(at_millis(20)));
        assert!(!reloaded.has_unread());
    }
}
