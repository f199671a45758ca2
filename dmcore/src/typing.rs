//! Typing indicators in both directions.

use crate::protocol::TypingSignal;
use crate::types::ids::ConversationId;
use std::time::{Duration, Instant};

pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(2);
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(3);

/// Rate limits our own "is typing" signals.
#[derive(Debug)]
pub struct LocalTyping {
    throttle: Duration,
    last_sent: Option<Instant>,
    /// Conversation we last told the peer we were typing in.
    signalled: Option<ConversationId>,
}

impl LocalTyping {
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            last_sent: None,
            signalled: None,
        }
    }

    /// The draft changed. Returns true when a start signal should go out.
    pub fn on_input(&mut self, conversation_id: ConversationId, now: Instant) -> bool {
        let due = match self.last_sent {
            Some(last) if self.signalled == Some(conversation_id) => {
                now.saturating_duration_since(last) >= self.throttle
            }
            _ => true,
        };
        if due {
            self.last_sent = Some(now);
            self.signalled = Some(conversation_id);
        }
        due
    }

    /// Returns the conversation a stop signal is owed to, if any.
    pub fn stop(&mut self) -> Option<ConversationId> {
        self.last_sent = None;
        self.signalled.take()
    }

    pub fn signalled(&self) -> Option<ConversationId> {
        self.signalled
    }
}

impl Default for LocalTyping {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTypingUpdate {
    /// Show `username`; arm the expiry timer with `token`.
    Started { username: String, token: u64 },
    Cleared,
    Unchanged,
}

/// Who is typing in the active conversation, as told by the peer.
#[derive(Debug, Default)]
pub struct RemoteTyping {
    current: Option<(ConversationId, String)>,
    token: u64,
}

impl RemoteTyping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(&self) -> Option<&str> {
        self.current.as_ref().map(|(_, name)| name.as_str())
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    pub fn on_signal(
        &mut self,
        active: Option<ConversationId>,
        signal: &TypingSignal,
    ) -> RemoteTypingUpdate {
        if active != Some(signal.conversation_id) {
            return RemoteTypingUpdate::Unchanged;
        }
        if signal.is_typing {
            self.token += 1;
            self.current = Some((signal.conversation_id, signal.username.clone()));
            RemoteTypingUpdate::Started {
                username: signal.username.clone(),
                token: self.token,
            }
        } else if self.clear() {
            RemoteTypingUpdate::Cleared
        } else {
            RemoteTypingUpdate::Unchanged
        }
    }

    /// Timer fired. Only the most recently armed token may clear.
    pub fn expire(&mut self, token: u64) -> bool {
        if token != self.token {
            return false;
        }
        self.current.take().is_some()
    }

    pub fn clear(&mut self) -> bool {
        self.token += 1;
        self.current.take().is_some()
    }
}
