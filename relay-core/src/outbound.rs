//! Outbound messages through the Meta Graph API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::types::Channel;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("conversation has no source id to send from")]
    MissingSourceId,

    #[error("no access token configured for channel {0}")]
    MissingToken(Channel),

    #[error("invalid Graph API url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Graph API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Graph API rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// A text message addressed to a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    /// Customer address: phone number for WhatsApp, PSID for Messenger.
    pub to: String,
    pub text: String,
    /// Phone number id to send from. Required for WhatsApp.
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundReceipt {
    pub channel: Channel,
    /// Raw Graph API response body.
    pub response: Value,
}

#[async_trait]
pub trait OutboundSender: Send + Sync + std::fmt::Debug {
    async fn send_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<OutboundReceipt, OutboundError>;
}

#[derive(Debug, Clone)]
pub struct GraphApiSettings {
    pub base_url: String,
    pub whatsapp_token: Option<String>,
    pub page_token: Option<String>,
    pub timeout: Duration,
}

impl Default for GraphApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            whatsapp_token: None,
            page_token: None,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Clone)]
pub struct GraphApiSender {
    http: reqwest::Client,
    base_url: Url,
    whatsapp_token: Option<String>,
    page_token: Option<String>,
}

impl std::fmt::Debug for GraphApiSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphApiSender")
            .field("base_url", &self.base_url.as_str())
            .field("whatsapp_token", &self.whatsapp_token.is_some())
            .field("page_token", &self.page_token.is_some())
            .finish_non_exhaustive()
    }
}

impl GraphApiSender {
    pub fn new(settings: GraphApiSettings) -> Result<Self, OutboundError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        // `Url::join` drops the last segment unless the base ends in '/'.
        let mut base = settings.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            http,
            base_url: Url::parse(&base)?,
            whatsapp_token: settings.whatsapp_token.filter(|t| !t.is_empty()),
            page_token: settings.page_token.filter(|t| !t.is_empty()),
        })
    }

    /// Endpoint and body for `message`, without touching the network.
    pub fn prepare(
        &self,
        message: &OutboundMessage,
    ) -> Result<PreparedRequest, OutboundError> {
        match message.channel {
            Channel::WhatsApp => {
                let token = self
                    .whatsapp_token
                    .clone()
                    .ok_or(OutboundError::MissingToken(Channel::WhatsApp))?;
                let source = message
                    .source_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or(OutboundError::MissingSourceId)?;

                Ok(PreparedRequest {
                    url: self.base_url.join(&format!("{source}/messages"))?,
                    token,
                    body: whatsapp_text_payload(&message.to, &message.text),
                })
            }
            Channel::Messenger => {
                let token = self
                    .page_token
                    .clone()
                    .ok_or(OutboundError::MissingToken(Channel::Messenger))?;

                Ok(PreparedRequest {
                    url: self.base_url.join("me/messages")?,
                    token,
                    body: messenger_text_payload(&message.to, &message.text),
                })
            }
        }
    }
}

#[async_trait]
impl OutboundSender for GraphApiSender {
    async fn send_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<OutboundReceipt, OutboundError> {
        let request = self.prepare(message)?;
        debug!(channel = %message.channel, url = %request.url, "sending Graph API message");

        let response = self
            .http
            .post(request.url)
            .bearer_auth(&request.token)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(channel = %message.channel, status = status.as_u16(), "Graph API rejected message");
            return Err(OutboundError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let response = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(OutboundReceipt {
            channel: message.channel,
            response,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: Url,
    pub token: String,
    pub body: Value,
}

pub fn whatsapp_text_payload(to: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": text },
    })
}

pub fn messenger_text_payload(recipient: &str, text: &str) -> Value {
    json!({
        "messaging_type": "RESPONSE",
        "recipient": { "id": recipient },
        "message": { "text": text },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> GraphApiSender {
        GraphApiSender::new(GraphApiSettings {
            whatsapp_token: Some("wa-token".to_string()),
            page_token: Some("page-token".to_string()),
            ..GraphApiSettings::default()
        })
        .unwrap()
    }

    fn message(channel: Channel, source_id: Option<&str>) -> OutboundMessage {
        OutboundMessage {
            channel,
            to: "96170123456".to_string(),
            text: "Hello".to_string(),
            source_id: source_id.map(str::to_string),
        }
    }

    #[test]
    fn whatsapp_request_targets_phone_number_id() {
        let request = sender()
            .prepare(&message(Channel::WhatsApp, Some("PHONE_ID")))
            .unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://graph.facebook.com/v19.0/PHONE_ID/messages"
        );
        assert_eq!(request.token, "wa-token");
        assert_eq!(request.body["messaging_product"], "whatsapp");
        assert_eq!(request.body["to"], "96170123456");
        assert_eq!(request.body["text"]["body"], "Hello");
    }

    #[test]
    fn messenger_request_targets_page_inbox() {
        let request = sender()
            .prepare(&message(Channel::Messenger, None))
            .unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://graph.facebook.com/v19.0/me/messages"
        );
        assert_eq!(request.token, "page-token");
        assert_eq!(request.body["messaging_type"], "RESPONSE");
        assert_eq!(request.body["recipient"]["id"], "96170123456");
        assert_eq!(request.body["message"]["text"], "Hello");
    }

    #[test]
    fn whatsapp_without_source_is_rejected() {
        let err = sender()
            .prepare(&message(Channel::WhatsApp, None))
            .unwrap_err();
        assert!(matches!(err, OutboundError::MissingSourceId));
    }

    #[test]
    fn missing_tokens_are_reported_per_channel() {
        let sender = GraphApiSender::new(GraphApiSettings {
            page_token: Some(String::new()),
            ..GraphApiSettings::default()
        })
        .unwrap();

        assert!(matches!(
            sender.prepare(&message(Channel::WhatsApp, Some("PHONE_ID"))),
            Err(OutboundError::MissingToken(Channel::WhatsApp))
        ));
        assert!(matches!(
            sender.prepare(&message(Channel::Messenger, None)),
            Err(OutboundError::MissingToken(Channel::Messenger))
        ));
    }

    #[test]
    fn trailing_slash_in_base_url_is_tolerated() {
        let sender = GraphApiSender::new(GraphApiSettings {
            base_url: "http://127.0.0.1:9999/graph/".to_string(),
            page_token: Some("t".to_string()),
            ..GraphApiSettings::default()
        })
        .unwrap();

        let request = sender.prepare(&message(Channel::Messenger, None)).unwrap();
        assert_eq!(request.url.as_str(), "http://127.0.0.1:9999/graph/me/messages");
    }

    #[test]
    fn debug_hides_tokens() {
        let rendered = format!("{:?}", sender());
        assert!(!rendered.contains("wa-token"));
        assert!(rendered.contains("whatsapp_token: true"));
    }
}
