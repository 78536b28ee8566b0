//! Domain records shared by the store, the fan-out core and the HTTP layer.

pub mod conversation;
pub mod events;
pub mod ids;
pub mod message;

pub use conversation::{Channel, Conversation, NewConversation, UnknownChannel};
pub use events::{ChangeEvent, MalformedPayload};
pub use ids::{ConversationId, SubscriptionId};
pub use message::{
    Direction, Message, NewMessage, UnknownDirection, truncate_to_millis,
};
