use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::ConversationId;

/// Messaging channel a conversation lives on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Channel {
    /// WhatsApp Cloud API.
    #[serde(rename = "WA")]
    WhatsApp,
    /// Messenger page inbox.
    #[serde(rename = "FB")]
    Messenger,
}

impl Channel {
    /// Wire/storage code of the channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::WhatsApp => "WA",
            Channel::Messenger => "FB",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored or submitted channel code is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel '{0}'")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WA" => Ok(Channel::WhatsApp),
            "FB" => Ok(Channel::Messenger),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// A customer thread on one channel, unique on `(external_id, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub channel: Channel,
    /// Customer address on the channel (WhatsApp phone or Messenger PSID).
    pub external_id: String,
    /// Business-side address that received the message (phone number id or
    /// page id). Replies are sent from it.
    pub source_id: Option<String>,
    pub customer_name: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Whether the conversation has activity newer than the last read mark.
    pub fn has_unread(&self) -> bool {
        self.last_read_at
            .map(|read| read < self.updated_at)
            .unwrap_or(true)
    }
}

/// Fields needed to create (or refresh) a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub channel: Channel,
    pub external_id: String,
    pub source_id: Option<String>,
    pub customer_name: Option<String>,
    /// Used as `updated_at` on creation and as the bump value on upsert.
    pub seen_at: DateTime<Utc>,
}
