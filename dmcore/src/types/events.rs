use crate::types::ids::{ConversationId, UserId};
use serde::Serialize;
use std::sync::{Arc, RwLock};

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

/// A send that did not reach the service. The text is handed back so the UI
/// can offer it again; the notice is transient and dismissable.
#[derive(Debug, Clone, Serialize)]
pub struct SendFailed {
    pub conversation_id: ConversationId,
    pub body: String,
    pub reason: String,
    /// Whether the text was put back into the (empty) draft.
    pub draft_restored: bool,
}

/// Notifications for downstream consumers. They carry just enough to know what
/// to re-read; the state itself is read through the client's snapshot getters.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Directory order, previews or unread counts changed.
    ConversationsChanged,
    /// The active timeline gained messages or read marks.
    TimelineChanged { conversation_id: ConversationId },
    /// The first page for the selected conversation arrived.
    ConversationActive { conversation_id: ConversationId },
    TypingChanged {
        conversation_id: ConversationId,
        username: Option<String>,
    },
    PresenceChanged {
        user_id: Option<UserId>,
        online: bool,
    },
    SendFailed(SendFailed),
    ChannelConnected,
    ChannelDisconnected,
    /// The push channel refused the credential; no further reconnects.
    ChannelRejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<String>>);

    impl EventHandler for Collect {
        fn handle_event(&self, event: &Event) {
            self.0
                .lock()
                .unwrap()
                .push(serde_json::to_string(event).unwrap());
        }
    }

    #[test]
    fn dispatch_reaches_every_handler() {
        let bus = CoreEventBus::new();
        assert!(!bus.has_handlers());

        let a = Arc::new(Collect(Mutex::new(Vec::new())));
        let b = Arc::new(Collect(Mutex::new(Vec::new())));
        bus.add_handler(a.clone());
        bus.add_handler(b.clone());

        bus.dispatch(&Event::TimelineChanged {
            conversation_id: ConversationId(3),
        });

        let seen = a.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], r#"{"type":"timeline_changed","conversation_id":3}"#);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
