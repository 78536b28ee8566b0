use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    Channel, Conversation, ConversationId, Direction, Message,
    NewConversation, NewMessage, truncate_to_millis,
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Clone)]
pub struct PostgresConversationStore {
    pool: PgPool,
}

impl PostgresConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// Database row types
#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    channel: String,
    external_id: String,
    source_id: Option<String>,
    customer_name: Option<String>,
    updated_at: DateTime<Utc>,
    last_read_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let channel = row
            .channel
            .parse::<Channel>()
            .map_err(|err| StoreError::InvalidRow(err.to_string()))?;

        Ok(Conversation {
            id: ConversationId::new(row.id),
            channel,
            external_id: row.external_id,
            source_id: row.source_id,
            customer_name: row.customer_name,
            updated_at: row.updated_at,
            last_read_at: row.last_read_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: String,
    direction: String,
    text: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let direction = row
            .direction
            .parse::<Direction>()
            .map_err(|err| StoreError::InvalidRow(err.to_string()))?;

        Ok(Message {
            id: row.id,
            conversation_id: ConversationId::new(row.conversation_id),
            direction,
            text: row.text,
            timestamp: row.timestamp,
        })
    }
}

#[async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn upsert_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (
                id, channel, external_id, source_id, customer_name, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id, channel) DO UPDATE SET
                updated_at = GREATEST(conversations.updated_at, EXCLUDED.updated_at)
            RETURNING
                id, channel, external_id, source_id, customer_name,
                updated_at, last_read_at
            "#,
        )
        .bind(ConversationId::generate().as_str())
        .bind(conversation.channel.as_str())
        .bind(&conversation.external_id)
        .bind(&conversation.source_id)
        .bind(&conversation.customer_name)
        .bind(conversation.seen_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> StoreResult<Conversation> {
        let inserted = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (
                id, channel, external_id, source_id, customer_name, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id, channel) DO NOTHING
            RETURNING
                id, channel, external_id, source_id, customer_name,
                updated_at, last_read_at
            "#,
        )
        .bind(ConversationId::generate().as_str())
        .bind(conversation.channel.as_str())
        .bind(&conversation.external_id)
        .bind(&conversation.source_id)
        .bind(&conversation.customer_name)
        .bind(conversation.seen_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.try_into();
        }

        self.find_conversation(&conversation.external_id, conversation.channel)
            .await?
            .ok_or_else(|| {
                StoreError::Database(format!(
                    "conversation {}/{} vanished after conflict",
                    conversation.channel, conversation.external_id
                ))
            })
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT
                id, channel, external_id, source_id, customer_name,
                updated_at, last_read_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }

    async fn find_conversation(
        &self,
        external_id: &str,
        channel: Channel,
    ) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT
                id, channel, external_id, source_id, customer_name,
                updated_at, last_read_at
            FROM conversations
            WHERE external_id = $1 AND channel = $2
            "#,
        )
        .bind(external_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }

    async fn list_conversations(
        &self,
        limit: usize,
    ) -> StoreResult<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT
                id, channel, external_id, source_id, customer_name,
                updated_at, last_read_at
            FROM conversations
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Conversation::try_from).collect()
    }

    async fn mark_read(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET last_read_at = $2 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        // The parent bump and the insert commit as one statement.
        let inserted = sqlx::query_as::<_, MessageRow>(
            r#"
            WITH parent AS (
                UPDATE conversations
                SET updated_at = GREATEST(updated_at, $5)
                WHERE id = $2
                RETURNING id
            )
            INSERT INTO messages (id, conversation_id, direction, text, timestamp)
            SELECT $1, parent.id, $3, $4, $5 FROM parent
            RETURNING id, conversation_id, direction, text, timestamp
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(message.conversation_id.as_str())
        .bind(message.direction.as_str())
        .bind(&message.text)
        .bind(truncate_to_millis(message.timestamp))
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(row)) => row.try_into(),
            Ok(None) => {
                Err(StoreError::ConversationNotFound(message.conversation_id))
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
            {
                Err(StoreError::ConversationNotFound(message.conversation_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, direction, text, timestamp
            FROM messages
            WHERE conversation_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(conversation_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn list_messages_since(
        &self,
        conversation_id: &ConversationId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, direction, text, timestamp
            FROM messages
            WHERE conversation_id = $1 AND timestamp > $2
            ORDER BY timestamp ASC
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
