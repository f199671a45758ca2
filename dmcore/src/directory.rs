use crate::types::conversation::Conversation;
use crate::types::ids::{ConversationId, MessageId};
use crate::types::message::Message;

/// Result of folding a message into the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryUpdate {
    Updated,
    /// The entry already reflects this message or a newer one.
    AlreadySeen,
    Unknown,
}

/// All conversations of the local user, newest activity first.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entries: Vec<Conversation>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.entries.iter().find(|c| c.id == id)
    }

    fn get_mut(&mut self, id: ConversationId) -> Option<&mut Conversation> {
        self.entries.iter_mut().find(|c| c.id == id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.get(id).is_some()
    }

    pub fn total_unread(&self) -> u32 {
        self.entries.iter().map(|c| c.unread_count).sum()
    }

    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        self.entries = conversations;
        self.sort();
    }

    /// Adds a conversation unless one with the same id is listed.
    pub fn insert_if_absent(&mut self, conversation: Conversation) -> bool {
        if self.contains(conversation.id) {
            return false;
        }
        self.entries.push(conversation);
        self.sort();
        true
    }

    /// Records `message` as the entry's latest activity. The `last_message` id
    /// acts as a watermark: anything at or below it is ignored.
    pub fn apply_message(&mut self, message: &Message, bump_unread: bool) -> EntryUpdate {
        let Some(entry) = self.get_mut(message.conversation_id) else {
            return EntryUpdate::Unknown;
        };
        if watermark(entry).is_some_and(|seen| message.id <= seen) {
            return EntryUpdate::AlreadySeen;
        }
        entry.last_message = Some(message.clone());
        entry.updated_at = message.created_at;
        if bump_unread {
            entry.unread_count += 1;
        }
        self.sort();
        EntryUpdate::Updated
    }

    /// Sets the unread count and returns the previous one.
    pub fn set_unread(&mut self, id: ConversationId, count: u32) -> Option<u32> {
        let entry = self.get_mut(id)?;
        Some(std::mem::replace(&mut entry.unread_count, count))
    }

    /// Gives back an optimistic clear, keeping anything that arrived since.
    pub fn restore_unread(&mut self, id: ConversationId, count: u32) {
        if let Some(entry) = self.get_mut(id) {
            entry.unread_count = entry.unread_count.saturating_add(count);
        }
    }

    fn sort(&mut self) {
        // Stable: ties keep fetch order.
        self.entries
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
}

fn watermark(entry: &Conversation) -> Option<MessageId> {
    entry.last_message.as_ref().map(|m| m.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::UserId;
    use crate::types::message::UserBrief;
    use chrono::{TimeZone, Utc};

    fn conv(id: i64, minute: u32, unread: u32) -> Conversation {
        Conversation {
            id: ConversationId(id),
            peer: UserBrief {
                id: UserId(100 + id),
                username: format!("peer{id}"),
            },
            last_message: None,
            unread_count: unread,
            created_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    fn msg(id: i64, conversation: i64, minute: u32) -> Message {
        Message {
            id: MessageId(id),
            conversation_id: ConversationId(conversation),
            sender_id: UserId(100 + conversation),
            sender: None,
            body: "hi".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 13, minute, 0).unwrap(),
            read_at: None,
        }
    }

    fn order(d: &Directory) -> Vec<i64> {
        d.conversations().iter().map(|c| c.id.get()).collect()
    }

    #[test]
    fn replace_sorts_newest_first_and_keeps_ties_stable() {
        let mut d = Directory::new();
        d.replace(vec![conv(1, 5, 0), conv(2, 9, 0), conv(3, 5, 0)]);
        assert_eq!(order(&d), vec![2, 1, 3]);
    }

    #[test]
    fn message_moves_entry_to_top_and_bumps_once() {
        let mut d = Directory::new();
        d.replace(vec![conv(1, 9, 0), conv(2, 5, 0)]);

        assert_eq!(d.apply_message(&msg(50, 2, 0), true), EntryUpdate::Updated);
        assert_eq!(order(&d), vec![2, 1]);
        assert_eq!(d.get(ConversationId(2)).unwrap().unread_count, 1);

        assert_eq!(
            d.apply_message(&msg(50, 2, 0), true),
            EntryUpdate::AlreadySeen
        );
        assert_eq!(d.get(ConversationId(2)).unwrap().unread_count, 1);
        assert_eq!(d.total_unread(), 1);
    }

    #[test]
    fn unknown_conversation_is_reported() {
        let mut d = Directory::new();
        assert_eq!(d.apply_message(&msg(1, 7, 0), true), EntryUpdate::Unknown);
    }

    #[test]
    fn optimistic_clear_can_be_restored() {
        let mut d = Directory::new();
        d.replace(vec![conv(1, 9, 3)]);
        assert_eq!(d.set_unread(ConversationId(1), 0), Some(3));
        d.apply_message(&msg(60, 1, 0), true);
        d.restore_unread(ConversationId(1), 3);
        assert_eq!(d.get(ConversationId(1)).unwrap().unread_count, 4);
        assert_eq!(d.set_unread(ConversationId(9), 0), None);
    }

    #[test]
    fn insert_if_absent_does_not_duplicate() {
        let mut d = Directory::new();
        assert!(d.insert_if_absent(conv(1, 1, 0)));
        assert!(!d.insert_if_absent(conv(1, 2, 0)));
        assert_eq!(d.len(), 1);
    }
}
