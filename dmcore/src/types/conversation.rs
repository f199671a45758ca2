use crate::types::ids::{ConversationId, UserId};
use crate::types::message::{Message, UserBrief};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A two-party thread as listed by the messaging service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    /// The other participant.
    #[serde(rename = "other_user")]
    pub peer: UserBrief,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, with = "crate::types::timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "crate::types::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn peer_id(&self) -> UserId {
        self.peer.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::MessageId;

    #[test]
    fn decodes_listing_entry() {
        let raw = r#"{
            "id": 4,
            "other_user": {"id": 12, "username": "jules"},
            "last_message": {"id": 55, "conversation_id": 4, "sender_id": 12, "body": "hi", "read_at": null, "created_at": "2024-05-01T20:15:00"},
            "unread_count": 2,
            "created_at": "2024-04-01T10:00:00",
            "updated_at": "2024-05-01T20:15:00"
        }"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        assert_eq!(conv.peer_id(), UserId(12));
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.last_message.unwrap().id, MessageId(55));
    }

    #[test]
    fn fresh_conversation_has_no_last_message() {
        let raw = r#"{"id":4,"other_user":{"id":12,"username":"jules"},"last_message":null,"unread_count":0,"updated_at":"2024-05-01T20:15:00"}"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        assert!(conv.last_message.is_none());
        assert!(conv.created_at.is_none());
    }
}
