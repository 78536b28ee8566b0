//! Meta webhook envelopes.
//!
//! Both WhatsApp Cloud API and Messenger deliver `{ object, entry: [...] }`;
//! only the fields the relay stores are modelled, everything else is
//! ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{Channel, NewConversation};

pub const WHATSAPP_OBJECT: &str = "whatsapp_business_account";
pub const MESSENGER_OBJECT: &str = "page";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEntry {
    /// Page id for Messenger entries.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
    #[serde(default)]
    pub messaging: Vec<MessengerEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppChange {
    #[serde(default)]
    pub value: Option<WhatsAppValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppValue {
    #[serde(default)]
    pub metadata: Option<WhatsAppMetadata>,
    #[serde(default)]
    pub contacts: Vec<WhatsAppContact>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppMetadata {
    #[serde(default)]
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppContact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppMessage {
    #[serde(default)]
    pub from: Option<String>,
    /// Epoch seconds, usually sent as a string.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessengerEvent {
    #[serde(default)]
    pub sender: Option<Participant>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub message: Option<MessengerMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub text: Option<String>,
}

/// One customer message extracted from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: Channel,
    pub external_id: String,
    pub source_id: Option<String>,
    pub customer_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn conversation(&self) -> NewConversation {
        NewConversation {
            channel: self.channel,
            external_id: self.external_id.clone(),
            source_id: self.source_id.clone(),
            customer_name: self.customer_name.clone(),
            seen_at: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EpochUnit {
    Seconds,
    Millis,
}

fn parse_timestamp(raw: Option<&Value>, unit: EpochUnit) -> Option<DateTime<Utc>> {
    let value = match raw? {
        Value::Number(number) => number.as_i64()?,
        Value::String(text) => text.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    match unit {
        EpochUnit::Seconds => DateTime::from_timestamp(value, 0),
        EpochUnit::Millis => DateTime::from_timestamp_millis(value),
    }
}

impl WebhookEnvelope {
    /// Messages in delivery order. Items without a sender are skipped, and a
    /// missing or unparsable timestamp falls back to `received_at`.
    pub fn inbound_messages(&self, received_at: DateTime<Utc>) -> Vec<InboundMessage> {
        match self.object.as_str() {
            WHATSAPP_OBJECT => self.whatsapp_messages(received_at),
            MESSENGER_OBJECT => self.messenger_messages(received_at),
            other => {
                warn!(object = other, "ignoring webhook for unhandled object type");
                Vec::new()
            }
        }
    }

    fn whatsapp_messages(&self, received_at: DateTime<Utc>) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let values = self
            .entry
            .iter()
            .flat_map(|entry| entry.changes.iter())
            .filter_map(|change| change.value.as_ref());

        for value in values {
            let source_id = value
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.phone_number_id.clone());

            for message in &value.messages {
                let Some(from) = message.from.clone().filter(|f| !f.is_empty()) else {
                    warn!("skipping WhatsApp message without sender");
                    continue;
                };

                let customer_name = message
                    .profile
                    .as_ref()
                    .and_then(|profile| profile.name.clone())
                    .or_else(|| contact_name(&value.contacts, &from));

                inbound.push(InboundMessage {
                    channel: Channel::WhatsApp,
                    external_id: from,
                    source_id: source_id.clone(),
                    customer_name,
                    text: message
                        .text
                        .as_ref()
                        .and_then(|text| text.body.clone())
                        .unwrap_or_default(),
                    timestamp: parse_timestamp(
                        message.timestamp.as_ref(),
                        EpochUnit::Seconds,
                    )
                    .unwrap_or(received_at),
                });
            }
        }

        inbound
    }

    fn messenger_messages(&self, received_at: DateTime<Utc>) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();

        for entry in &self.entry {
            for event in &entry.messaging {
                let Some(sender) = event
                    .sender
                    .as_ref()
                    .and_then(|sender| sender.id.clone())
                    .filter(|id| !id.is_empty())
                else {
                    warn!("skipping Messenger event without sender");
                    continue;
                };

                inbound.push(InboundMessage {
                    channel: Channel::Messenger,
                    external_id: sender,
                    source_id: entry.id.clone(),
                    customer_name: None,
                    text: event
                        .message
                        .as_ref()
                        .and_then(|message| message.text.clone())
                        .unwrap_or_default(),
                    timestamp: parse_timestamp(
                        event.timestamp.as_ref(),
                        EpochUnit::Millis,
                    )
                    .unwrap_or(received_at),
                });
            }
        }

        inbound
    }
}

fn contact_name(contacts: &[WhatsAppContact], from: &str) -> Option<String> {
    contacts
        .iter()
        .find(|contact| contact.wa_id.as_deref() == Some(from))
        .or_else(|| contacts.first())
        .and_then(|contact| contact.profile.as_ref())
        .and_then(|profile| profile.name.clone())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn received_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn parse(value: Value) -> WebhookEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn whatsapp_envelope_yields_messages() {
        let envelope = parse(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA_ID",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {
                            "display_phone_number": "96170000000",
                            "phone_number_id": "PHONE_ID"
                        },
                        "contacts": [{
                            "wa_id": "96171111111",
                            "profile": { "name": "Rana" }
                        }],
                        "messages": [{
                            "from": "96171111111",
                            "id": "wamid.1",
                            "timestamp": "1718000000",
                            "type": "text",
                            "text": { "body": "Hi there" }
                        }]
                    }
                }]
            }]
        }));

        let messages = envelope.inbound_messages(received_at());
        assert_eq!(
            messages,
            vec![InboundMessage {
                channel: Channel::WhatsApp,
                external_id: "96171111111".to_string(),
                source_id: Some("PHONE_ID".to_string()),
                customer_name: Some("Rana".to_string()),
                text: "Hi there".to_string(),
                timestamp: DateTime::from_timestamp(1_718_000_000, 0).unwrap(),
            }]
        );
    }

    #[test]
    fn messenger_envelope_uses_page_id_and_millis() {
        let envelope = parse(json!({
            "object": "page",
            "entry": [{
                "id": "PAGE_ID",
                "time": 1718000000123u64,
                "messaging": [
                    {
                        "sender": { "id": "PSID_1" },
                        "recipient": { "id": "PAGE_ID" },
                        "timestamp": 1718000000123u64,
                        "message": { "mid": "m_1", "text": "Salut" }
                    },
                    {
                        "recipient": { "id": "PAGE_ID" },
                        "timestamp": 1718000000456u64
                    }
                ]
            }]
        }));

        let messages = envelope.inbound_messages(received_at());
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.channel, Channel::Messenger);
        assert_eq!(message.external_id, "PSID_1");
        assert_eq!(message.source_id.as_deref(), Some("PAGE_ID"));
        assert_eq!(message.text, "Salut");
        assert_eq!(message.timestamp.timestamp_millis(), 1_718_000_000_123);
    }

    #[test]
    fn missing_text_and_timestamp_fall_back() {
        let envelope = parse(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{ "from": "123", "type": "image" }]
                    }
                }]
            }]
        }));

        let messages = envelope.inbound_messages(received_at());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "");
        assert_eq!(messages[0].timestamp, received_at());
        assert!(messages[0].source_id.is_none());
    }

    #[test]
    fn unknown_object_is_ignored() {
        let envelope = parse(json!({
            "object": "instagram",
            "entry": [{ "messaging": [{ "sender": { "id": "x" } }] }]
        }));
        assert!(envelope.inbound_messages(received_at()).is_empty());
    }

    #[test]
    fn status_only_changes_yield_nothing() {
        let envelope = parse(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "phone_number_id": "PHONE_ID" },
                        "statuses": [{ "id": "wamid.1", "status": "read" }]
                    }
                }]
            }]
        }));
        assert!(envelope.inbound_messages(received_at()).is_empty());
    }
}
