//! Merges the write path and the push channel into one directory and one
//! active timeline. Pure state: every call reports its effects through an
//! [`IngestOutcome`] and the caller performs the I/O.

use crate::directory::{Directory, EntryUpdate};
use crate::protocol::ReadReceipt;
use crate::session::StaleResult;
use crate::timeline::Timeline;
use crate::types::conversation::Conversation;
use crate::types::ids::ConversationId;
use crate::types::message::{Message, MessagePage};
use log::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[must_use]
pub struct IngestOutcome {
    pub timeline_changed: bool,
    pub directory_changed: bool,
    /// A conversation we do not list showed up; re-list from the service.
    pub refresh_needed: bool,
    /// Tell the peer we have seen this conversation.
    pub read_receipt: Option<ConversationId>,
}

impl IngestOutcome {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    fn directory(update: EntryUpdate) -> Self {
        Self {
            directory_changed: update == EntryUpdate::Updated,
            refresh_needed: update == EntryUpdate::Unknown,
            ..Self::default()
        }
    }
}

/// Identifies one directory refresh; only the newest may land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

#[derive(Debug, Default)]
pub struct Reconciler {
    directory: Directory,
    timeline: Option<Timeline>,
    acknowledged: bool,
    refresh_generation: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.timeline.as_ref().map(Timeline::conversation_id)
    }

    fn is_active(&self, id: ConversationId) -> bool {
        self.active_conversation() == Some(id)
    }

    /// Starts an empty timeline for `id`, dropping whatever was loaded before.
    pub fn open_timeline(&mut self, id: ConversationId) {
        let peer = self.directory.get(id).map(Conversation::peer_id);
        self.timeline = Some(Timeline::new(id, peer));
        self.acknowledged = false;
    }

    pub fn close_timeline(&mut self) -> bool {
        self.acknowledged = false;
        self.timeline.take().is_some()
    }

    /// Zeroes the unread count of the active conversation. Returns the count
    /// that was cleared.
    pub fn acknowledge(&mut self, id: ConversationId) -> u32 {
        if !self.is_active(id) {
            return 0;
        }
        self.acknowledged = true;
        self.directory.set_unread(id, 0).unwrap_or(0)
    }

    /// Undoes [`Self::acknowledge`] after the service refused to mark it read.
    pub fn restore_unread(&mut self, id: ConversationId, count: u32) -> IngestOutcome {
        if self.is_active(id) {
            self.acknowledged = false;
        }
        if count == 0 {
            return IngestOutcome::default();
        }
        self.directory.restore_unread(id, count);
        IngestOutcome {
            directory_changed: true,
            ..IngestOutcome::default()
        }
    }

    /// A message confirmed by the write path.
    pub fn ingest_sent(&mut self, message: Message) -> IngestOutcome {
        let update = self.directory.apply_message(&message, false);
        let mut outcome = IngestOutcome::directory(update);
        if let Some(timeline) = self.timeline.as_mut() {
            outcome.timeline_changed = timeline.insert(message);
        }
        outcome
    }

    /// A message delivered by the push channel.
    pub fn ingest_pushed(&mut self, message: Message) -> IngestOutcome {
        let conversation_id = message.conversation_id;
        let viewing = self.is_active(conversation_id);
        let update = self.directory.apply_message(&message, !viewing);
        let mut outcome = IngestOutcome::directory(update);

        if viewing {
            if let Some(timeline) = self.timeline.as_mut() {
                outcome.timeline_changed = timeline.insert(message);
            }
            if outcome.timeline_changed {
                outcome.read_receipt = Some(conversation_id);
            }
        }
        if outcome.is_noop() {
            debug!(target: "Reconciler", "Duplicate push for conversation {conversation_id} ignored");
        }
        outcome
    }

    /// Merges a history page if it still belongs to the active conversation.
    pub fn ingest_page(&mut self, id: ConversationId, page: MessagePage) -> IngestOutcome {
        let Some(timeline) = self.timeline.as_mut().filter(|t| t.conversation_id() == id) else {
            return IngestOutcome::default();
        };
        let before = timeline.cursor();
        let added = timeline.merge_page(page);
        IngestOutcome {
            timeline_changed: added > 0 || timeline.cursor() != before,
            ..IngestOutcome::default()
        }
    }

    /// Merges the newest page after a reconnect. The loaded cursor is kept
    /// unless the page is detached from the loaded tail.
    pub fn ingest_recent(&mut self, id: ConversationId, page: MessagePage) -> IngestOutcome {
        let Some(timeline) = self.timeline.as_mut().filter(|t| t.conversation_id() == id) else {
            return IngestOutcome::default();
        };
        let before = timeline.cursor();
        let added = timeline.merge_recent(page);
        IngestOutcome {
            timeline_changed: added > 0 || timeline.cursor() != before,
            ..IngestOutcome::default()
        }
    }

    pub fn apply_read_receipt(&mut self, receipt: &ReadReceipt) -> IngestOutcome {
        let Some(timeline) = self
            .timeline
            .as_mut()
            .filter(|t| t.conversation_id() == receipt.conversation_id)
        else {
            return IngestOutcome::default();
        };
        IngestOutcome {
            timeline_changed: timeline.apply_read_receipt(receipt.read_at) > 0,
            ..IngestOutcome::default()
        }
    }

    /// Lists a conversation opened for a peer.
    pub fn insert_conversation(&mut self, conversation: Conversation) -> IngestOutcome {
        IngestOutcome {
            directory_changed: self.directory.insert_if_absent(conversation),
            ..IngestOutcome::default()
        }
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.refresh_generation += 1;
        RefreshTicket(self.refresh_generation)
    }

    /// Replaces the directory with an authoritative listing.
    pub fn finish_refresh(
        &mut self,
        ticket: RefreshTicket,
        conversations: Vec<Conversation>,
    ) -> Result<IngestOutcome, StaleResult> {
        if ticket.0 != self.refresh_generation {
            return Err(StaleResult);
        }
        self.directory.replace(conversations);
        if self.acknowledged
            && let Some(active) = self.active_conversation()
        {
            self.directory.set_unread(active, 0);
        }
        Ok(IngestOutcome {
            directory_changed: true,
            ..IngestOutcome::default()
        })
    }
}
