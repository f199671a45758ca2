//! Push-channel vocabulary of the messaging service.

use crate::socketio::SocketPacket;
use crate::types::ids::{ConversationId, UserId};
use crate::types::message::Message;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("event '{0}' arrived without a payload")]
    MissingPayload(&'static str),
    #[error("invalid payload for '{event}': {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode '{event}': {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub mod names {
    pub const NEW_DM: &str = "new_dm";
    pub const DM_USER_TYPING: &str = "dm_user_typing";
    pub const DM_MESSAGES_READ: &str = "dm_messages_read";
    pub const FRIEND_ONLINE: &str = "friend_online";
    pub const FRIEND_OFFLINE: &str = "friend_offline";
    pub const ERROR: &str = "error";

    pub const JOIN_DM: &str = "join_dm";
    pub const LEAVE_DM: &str = "leave_dm";
    pub const NOTIFY_DM: &str = "notify_dm";
    pub const DM_TYPING: &str = "dm_typing";
    pub const DM_READ: &str = "dm_read";
}

/// A peer started or stopped typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub username: String,
    pub is_typing: bool,
}

/// The peer read the conversation up to `read_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    #[serde(with = "crate::types::timestamp")]
    pub read_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PresencePayload {
    user_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewMessage(Message),
    Typing(TypingSignal),
    MessagesRead(ReadReceipt),
    FriendOnline(UserId),
    FriendOffline(UserId),
    /// Server-side error notice; never fatal.
    ServerError(Value),
}

impl InboundEvent {
    /// Interprets a Socket.IO event. Unknown names yield `Ok(None)`.
    pub fn decode(name: &str, args: Vec<Value>) -> Result<Option<Self>, ProtocolError> {
        let payload = args.into_iter().next();
        let event = match name {
            names::NEW_DM => Self::NewMessage(parse(names::NEW_DM, payload)?),
            names::DM_USER_TYPING => Self::Typing(parse(names::DM_USER_TYPING, payload)?),
            names::DM_MESSAGES_READ => {
                Self::MessagesRead(parse(names::DM_MESSAGES_READ, payload)?)
            }
            names::FRIEND_ONLINE => {
                let p: PresencePayload = parse(names::FRIEND_ONLINE, payload)?;
                Self::FriendOnline(p.user_id)
            }
            names::FRIEND_OFFLINE => {
                let p: PresencePayload = parse(names::FRIEND_OFFLINE, payload)?;
                Self::FriendOffline(p.user_id)
            }
            names::ERROR => {
                let detail = payload.unwrap_or(Value::Null);
                warn!(target: "Protocol", "Server reported error: {detail}");
                Self::ServerError(detail)
            }
            other => {
                debug!(target: "Protocol", "Ignoring unhandled event '{other}'");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    payload: Option<Value>,
) -> Result<T, ProtocolError> {
    let payload = payload.ok_or(ProtocolError::MissingPayload(event))?;
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    JoinDm,
    LeaveDm,
    /// Relays a confirmed send so the peer's open screens update live.
    NotifyDm {
        conversation_id: ConversationId,
        message: Message,
    },
    Typing {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    Read {
        conversation_id: ConversationId,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JoinDm => names::JOIN_DM,
            OutboundEvent::LeaveDm => names::LEAVE_DM,
            OutboundEvent::NotifyDm { .. } => names::NOTIFY_DM,
            OutboundEvent::Typing { .. } => names::DM_TYPING,
            OutboundEvent::Read { .. } => names::DM_READ,
        }
    }

    pub fn payload(&self) -> Result<Option<Value>, ProtocolError> {
        #[derive(Serialize)]
        struct Notify<'a> {
            conversation_id: ConversationId,
            message: &'a Message,
        }
        #[derive(Serialize)]
        struct Typing {
            conversation_id: ConversationId,
            is_typing: bool,
        }
        #[derive(Serialize)]
        struct Read {
            conversation_id: ConversationId,
        }

        let event = self.name();
        let value = match self {
            OutboundEvent::JoinDm | OutboundEvent::LeaveDm => return Ok(None),
            OutboundEvent::NotifyDm {
                conversation_id,
                message,
            } => serde_json::to_value(Notify {
                conversation_id: *conversation_id,
                message,
            }),
            OutboundEvent::Typing {
                conversation_id,
                is_typing,
            } => serde_json::to_value(Typing {
                conversation_id: *conversation_id,
                is_typing: *is_typing,
            }),
            OutboundEvent::Read { conversation_id } => serde_json::to_value(Read {
                conversation_id: *conversation_id,
            }),
        };
        value
            .map(Some)
            .map_err(|source| ProtocolError::Encode { event, source })
    }

    pub fn to_packet(&self) -> Result<SocketPacket, ProtocolError> {
        Ok(SocketPacket::event(self.name(), self.payload()?))
    }
}

/// What subscribers of the push channel observe, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Handshake completed. `resumed` is set after a reconnect.
    Connected { resumed: bool },
    Disconnected { reason: String },
    /// The credential was refused; the channel will not reconnect.
    Rejected { reason: String },
    Inbound(InboundEvent),
}
