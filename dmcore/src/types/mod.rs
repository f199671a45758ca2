pub mod conversation;
pub mod events;
pub mod ids;
pub mod message;
pub mod timestamp;

pub use conversation::Conversation;
pub use ids::{ConversationId, MessageId, UserId};
pub use message::{Message, MessagePage, UserBrief};
