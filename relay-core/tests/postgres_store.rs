#![cfg(feature = "postgres-tests")]

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use relay_core::{
    Channel, ConversationId, ConversationStore, FanoutService, FanoutSettings,
    FeedStatus, NewConversation, NewMessage, PgChangeSource,
    PostgresConversationStore, StoreError,
    fanout::StreamMessage,
};
use sqlx::PgPool;

fn new_conversation(external_id: &str) -> NewConversation {
    NewConversation {
        channel: Channel::WhatsApp,
        external_id: external_id.to_string(),
        source_id: Some("100200300".to_string()),
        customer_name: Some("Rima".to_string()),
        seen_at: Utc::now(),
    }
}

#[sqlx::test(migrator = "relay_core::MIGRATOR")]
async fn upsert_is_unique_per_external_id_and_channel(pool: PgPool) -> Result<()> {
    let store = PostgresConversationStore::new(pool);

    let first = store.upsert_conversation(new_conversation("96170000001")).await?;
    let again = store.upsert_conversation(new_conversation("96170000001")).await?;
    assert_eq!(first.id, again.id);

    let other_channel = store
        .upsert_conversation(NewConversation {
            channel: Channel::Messenger,
            ..new_conversation("96170000001")
        })
        .await?;
    assert_ne!(first.id, other_channel.id);

    assert_eq!(store.list_conversations(10).await?.len(), 2);
    Ok(())
}

#[sqlx::test(migrator = "relay_core::MIGRATOR")]
async fn messages_since_is_strictly_newer(pool: PgPool) -> Result<()> {
    let store = PostgresConversationStore::new(pool);
    let conversation =
        store.upsert_conversation(new_conversation("96170000002")).await?;

    let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    for (secs, text) in [(2, "b"), (1, "a"), (3, "c")] {
        store
            .create_message(NewMessage::inbound(conversation.id.clone(), text, at(secs)))
            .await?;
    }

    let since = store.list_messages_since(&conversation.id, at(1)).await?;
    let texts: Vec<_> = since.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["b", "c"]);
    Ok(())
}

#[sqlx::test(migrator = "relay_core::MIGRATOR")]
async fn late_upsert_does_not_move_updated_at_back(pool: PgPool) -> Result<()> {
    let store = PostgresConversationStore::new(pool);
    let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();

    let first = store
        .upsert_conversation(NewConversation {
            seen_at: at(100),
            ..new_conversation("96170000004")
        })
        .await?;
    let late = store
        .upsert_conversation(NewConversation {
            seen_at: at(10),
            ..new_conversation("96170000004")
        })
        .await?;

    assert_eq!(late.id, first.id);
    assert_eq!(late.updated_at, at(100));
    Ok(())
}

#[sqlx::test(migrator = "relay_core::MIGRATOR")]
async fn create_message_bumps_parent_in_the_same_write(pool: PgPool) -> Result<()> {
    let store = PostgresConversationStore::new(pool);
    let conversation = store
        .upsert_conversation(NewConversation {
            seen_at: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            ..new_conversation("96170000005")
        })
        .await?;

    let mut reply = NewMessage::outbound(conversation.id.clone(), "on my way", Utc::now());
    reply.timestamp = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
    let stored = store.create_message(reply).await?;
    assert_eq!(stored.timestamp_millis(), 1_700_000_000_123);
    assert_eq!(stored.timestamp.timestamp_subsec_nanos(), 123_000_000);

    let refreshed = store
        .get_conversation(&conversation.id)
        .await?
        .expect("conversation present");
    assert_eq!(refreshed.updated_at, stored.timestamp);

    let since = DateTime::from_timestamp_millis(stored.timestamp_millis())
        .expect("valid millis");
    assert!(store.list_messages_since(&conversation.id, since).await?.is_empty());

    let missing = store
        .create_message(NewMessage::inbound(
            ConversationId::new("missing"),
            "hi",
            Utc::now(),
        ))
        .await;
    assert!(matches!(missing, Err(StoreError::ConversationNotFound(_))));
    Ok(())
}

#[sqlx::test(migrator = "relay_core::MIGRATOR")]
async fn change_feed_delivers_notifications_to_streams(pool: PgPool) -> Result<()> {
    let store: Arc<dyn ConversationStore> =
        Arc::new(PostgresConversationStore::new(pool.clone()));
    let source = Arc::new(PgChangeSource::new(pool.clone(), "new_message"));
    let fanout = FanoutService::with_change_feed(
        Arc::clone(&store),
        source,
        FanoutSettings::default(),
    );

    let feed = fanout.feed().cloned().expect("feed started");
    tokio::time::timeout(
        Duration::from_secs(5),
        feed.wait_for(|status| matches!(status, FeedStatus::Listening)),
    )
    .await?;

    let conversation =
        store.upsert_conversation(new_conversation("96170000003")).await?;
    let mut stream = fanout.subscriptions().open_stream(&conversation.id);

    fanout.dispatcher().notify_changed(&conversation.id).await;
    let update = tokio::time::timeout(Duration::from_secs(5), stream.next()).await?;
    match update {
        Some(StreamMessage::Update(event)) => {
            assert_eq!(event.conversation_id, conversation.id)
        }
        other => panic!("expected update, got {other:?}"),
    }

    // A trigger-style bare id payload is understood as well.
    sqlx::query("SELECT pg_notify('new_message', $1)")
        .bind(conversation.id.as_str())
        .execute(&pool)
        .await?;
    let update = tokio::time::timeout(Duration::from_secs(5), stream.next()).await?;
    assert!(matches!(update, Some(StreamMessage::Update(_))));

    fanout.shutdown().await;
    Ok(())
}
