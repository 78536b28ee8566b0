//! Core library for the inbox relay.
//!
//! The relay sits between Meta's webhooks (WhatsApp Cloud API and Messenger
//! pages) and a dashboard. This crate owns everything that is not HTTP:
//!
//! - [`store`]: the conversation store trait with Postgres and in-memory
//!   implementations.
//! - [`fanout`]: realtime notification fan-out. Writers call the
//!   [`Dispatcher`](fanout::Dispatcher) after a message commits, the
//!   [`ChangeFeed`](fanout::ChangeFeed) bridges store notifications into the
//!   in-process [`EventBus`](fanout::EventBus), and the
//!   [`SubscriptionManager`](fanout::SubscriptionManager) hands matching
//!   events to SSE streams and long-poll waiters.
//! - [`outbound`]: the Graph API sender used by the reply action.
//! - [`inbound`]: parsing of Meta webhook envelopes.

pub mod error;
pub mod fanout;
pub mod inbound;
pub mod outbound;
pub mod phone;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use fanout::{
    ChangeFeed, ChangeFeedHandle, ChangeSource, Dispatcher, EventBus,
    FanoutService, FanoutSettings, FeedError, FeedStatus,
    InMemoryChangeSource, PgChangeSource, SubscriptionManager,
};
pub use inbound::{InboundMessage, WebhookEnvelope};
pub use outbound::{
    GraphApiSender, GraphApiSettings, OutboundError, OutboundMessage,
    OutboundReceipt, OutboundSender,
};
pub use phone::normalize_phone;
pub use store::{
    ConversationStore, InMemoryConversationStore, PostgresConversationStore,
};
pub use types::{
    Channel, ChangeEvent, Conversation, ConversationId, Direction, Message,
    NewConversation, NewMessage, SubscriptionId,
};

/// Embedded migrations for the `conversations` and `messages` tables.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
