use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::ids::ConversationId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Customer to business.
    In,
    /// Business to customer.
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message direction '{0}'")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(UnknownDirection(other.to_string())),
        }
    }
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Timestamp as milliseconds since the Unix epoch, the unit long-poll
    /// clients pass back as `since`. Stored timestamps never carry
    /// sub-millisecond precision, so this round-trips exactly.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Drops everything below the millisecond.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn inbound(
        conversation_id: ConversationId,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id,
            direction: Direction::In,
            text: text.into(),
            timestamp: truncate_to_millis(timestamp),
        }
    }

    pub fn outbound(
        conversation_id: ConversationId,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id,
            direction: Direction::Out,
            text: text.into(),
            timestamp: truncate_to_millis(timestamp),
        }
    }
}
