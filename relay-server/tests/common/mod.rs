use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use relay_config::Config;
use relay_core::{
    Channel, Conversation, ConversationStore, FanoutService, FanoutSettings,
    InMemoryConversationStore, NewConversation, OutboundError,
    OutboundMessage, OutboundReceipt, OutboundSender,
};
use relay_server::{AppState, create_app, infra::app_context::AppContext};
use serde_json::json;

pub const VERIFY_TOKEN: &str = "relay-verify";

/// Captures outbound sends instead of calling the Graph API.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<OutboundMessage>>,
    reject_with: Mutex<Option<u16>>,
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
impl RecordingSender {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn reject_with(&self, status: u16) {
        if let Ok(mut slot) = self.reject_with.lock() {
            *slot = Some(status);
        }
    }
}

#[async_trait]
impl OutboundSender for RecordingSender {
    async fn send_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<OutboundReceipt, OutboundError> {
        let rejected = self.reject_with.lock().ok().and_then(|slot| *slot);
        if let Some(status) = rejected {
            return Err(OutboundError::Rejected {
                status,
                body: r#"{"error":{"message":"rejected"}}"#.to_string(),
            });
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        Ok(OutboundReceipt {
            channel: message.channel,
            response: json!({ "messages": [{ "id": "wamid.test" }] }),
        })
    }
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub store: Arc<dyn ConversationStore>,
    pub sender: Arc<RecordingSender>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.meta.verify_token = VERIFY_TOKEN.to_string();
    config.meta.default_phone_number_id = Some("100200300".to_string());
    config.fanout.heartbeat_interval = Duration::from_millis(100);
    config.fanout.poll_ceiling = Duration::from_secs(2);
    config
}

pub fn build_state(config: Config) -> (AppState, Arc<RecordingSender>) {
    let store: Arc<dyn ConversationStore> =
        Arc::new(InMemoryConversationStore::new());
    let settings = FanoutSettings {
        heartbeat_interval: config.fanout.heartbeat_interval,
        poll_ceiling: config.fanout.poll_ceiling,
        ..FanoutSettings::default()
    };
    let fanout = FanoutService::single_process(Arc::clone(&store), settings);
    let sender = Arc::new(RecordingSender::default());
    let outbound: Arc<dyn OutboundSender> = sender.clone();

    let context = Arc::new(AppContext::new(
        Arc::new(config),
        store,
        fanout,
        outbound,
    ));
    (AppState::new(context), sender)
}

pub fn build_test_app_with(config: Config) -> Result<TestApp> {
    let (state, sender) = build_state(config);
    let server = TestServer::new(create_app(state.clone()))
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    Ok(TestApp {
        server,
        store: state.store(),
        state,
        sender,
    })
}

pub fn build_test_app() -> Result<TestApp> {
    build_test_app_with(test_config())
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub async fn seed_conversation(
    store: &Arc<dyn ConversationStore>,
    channel: Channel,
    external_id: &str,
    source_id: Option<&str>,
    seen_at: DateTime<Utc>,
) -> Result<Conversation> {
    let conversation = store
        .upsert_conversation(NewConversation {
            channel,
            external_id: external_id.to_string(),
            source_id: source_id.map(str::to_string),
            customer_name: Some("Test Customer".to_string()),
            seen_at,
        })
        .await?;
    Ok(conversation)
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub fn whatsapp_delivery(from: &str, text: &str, unix_secs: i64) -> serde_json::Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "metadata": { "phone_number_id": "100200300" },
                    "contacts": [{ "wa_id": from, "profile": { "name": "Rima" } }],
                    "messages": [{
                        "from": from,
                        "timestamp": unix_secs.to_string(),
                        "type": "text",
                        "text": { "body": text }
                    }]
                }
            }]
        }]
    })
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub fn messenger_delivery(psid: &str, text: &str, unix_millis: i64) -> serde_json::Value {
    json!({
        "object": "page",
        "entry": [{
            "id": "page-42",
            "time": unix_millis,
            "messaging": [{
                "sender": { "id": psid },
                "recipient": { "id": "page-42" },
                "timestamp": unix_millis,
                "message": { "mid": "m_1", "text": text }
            }]
        }]
    })
}
