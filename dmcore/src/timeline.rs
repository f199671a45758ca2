use crate::types::ids::{ConversationId, MessageId, UserId};
use crate::types::message::{Message, MessagePage};
use chrono::{DateTime, Utc};

/// Position for the next backward page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Oldest loaded message; `None` until the first page lands.
    pub before: Option<MessageId>,
    pub has_more: bool,
}

/// The loaded history of one conversation, strictly ascending and unique by id.
#[derive(Debug, Clone)]
pub struct Timeline {
    conversation_id: ConversationId,
    peer_id: Option<UserId>,
    messages: Vec<Message>,
    has_more: bool,
}

impl Timeline {
    pub fn new(conversation_id: ConversationId, peer_id: Option<UserId>) -> Self {
        Self {
            conversation_id,
            peer_id,
            messages: Vec::new(),
            has_more: false,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.binary_search_by_key(&id, |m| m.id).is_ok()
    }

    pub fn cursor(&self) -> PaginationCursor {
        PaginationCursor {
            before: self.messages.first().map(|m| m.id),
            has_more: self.has_more,
        }
    }

    /// Inserts at the id-ordered position. Returns false for a known id or a
    /// message from another conversation.
    pub fn insert(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        match self.messages.binary_search_by_key(&message.id, |m| m.id) {
            Ok(_) => false,
            Err(pos) => {
                self.messages.insert(pos, message);
                true
            }
        }
    }

    /// Merges a fetched page and adopts its `has_more`. Returns how many
    /// messages were new.
    pub fn merge_page(&mut self, page: MessagePage) -> usize {
        self.has_more = page.has_more;
        self.insert_all(page.messages)
    }

    /// Merges the newest page without disturbing the backward cursor of an
    /// already loaded history. A page that does not reach back to the loaded
    /// tail leaves a gap the cursor could never page into, so the loaded
    /// history is replaced by the page and its cursor adopted.
    pub fn merge_recent(&mut self, page: MessagePage) -> usize {
        let newest_loaded = match self.messages.last() {
            Some(m) => m.id,
            None => return self.merge_page(page),
        };
        let oldest_fetched = page
            .messages
            .iter()
            .filter(|m| m.conversation_id == self.conversation_id)
            .map(|m| m.id)
            .min();
        match oldest_fetched {
            Some(oldest) if page.has_more && oldest > newest_loaded => {
                self.messages.clear();
                self.merge_page(page)
            }
            _ => self.insert_all(page.messages),
        }
    }

    fn insert_all(&mut self, messages: Vec<Message>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.insert(message) {
                added += 1;
            }
        }
        added
    }

    /// Marks our own unread messages as read by the peer. Without a known
    /// peer every unread message up to `read_at` is marked.
    pub fn apply_read_receipt(&mut self, read_at: DateTime<Utc>) -> usize {
        let peer = self.peer_id;
        let mut marked = 0;
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.read_at.is_none() && m.created_at <= read_at)
            .filter(|m| peer != Some(m.sender_id))
        {
            message.read_at = Some(read_at);
            marked += 1;
        }
        marked
    }
}
