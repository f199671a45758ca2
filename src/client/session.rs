use crate::client::{Client, Effects};
use crate::error::ClientError;
use crate::types::events::Event;
use dmcore::protocol::OutboundEvent;
use dmcore::session::SelectionTicket;
use dmcore::types::{ConversationId, UserId};
use log::{debug, info, warn};

/// How a selection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The first page landed and the conversation is active.
    Active,
    /// Another selection (or a close) replaced this one before it resolved.
    Superseded,
}

impl Client {
    /// Makes `conversation_id` the active conversation.
    ///
    /// The unread count drops to zero right away and the service is told
    /// once; if that fails the count comes back. The first page is fetched
    /// alongside, and the conversation becomes active the moment it arrives
    /// if it is still the one wanted, without waiting on the read call.
    pub async fn select(
        &self,
        conversation_id: ConversationId,
    ) -> Result<SelectOutcome, ClientError> {
        let mut effects = Effects::default();
        let (ticket, cleared) = {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.local_typing.stop() {
                effects.outbound.push(OutboundEvent::Typing {
                    conversation_id: previous,
                    is_typing: false,
                });
            }
            let ticket = state.session.select(conversation_id);
            state.reconciler.open_timeline(conversation_id);
            if state.remote_typing.clear() {
                effects.event(Event::TypingChanged {
                    conversation_id,
                    username: None,
                });
            }
            let cleared = state.reconciler.acknowledge(conversation_id);
            if cleared > 0 {
                effects.event(Event::ConversationsChanged);
            }
            (ticket, cleared)
        };
        self.typing_expiry.cancel();
        effects.event(Event::TimelineChanged { conversation_id });
        self.apply_effects(effects).await;
        info!(target: "Client/Session", "Selected conversation {conversation_id}");

        let mark_read = async {
            if cleared > 0 {
                self.acknowledge_read(conversation_id, cleared).await;
            }
        };
        let first_page = self.load_first_page(ticket);
        let ((), outcome) = tokio::join!(mark_read, first_page);
        outcome
    }

    async fn acknowledge_read(&self, conversation_id: ConversationId, cleared: u32) {
        match self.api.mark_read(conversation_id).await {
            Ok(()) => {
                self.channel
                    .emit(OutboundEvent::Read { conversation_id })
                    .await;
            }
            Err(e) => {
                warn!(target: "Client/Session", "Mark read for {conversation_id} failed: {e}");
                let outcome = self
                    .state
                    .lock()
                    .await
                    .reconciler
                    .restore_unread(conversation_id, cleared);
                let mut effects = Effects::default();
                effects.absorb(outcome, None);
                self.apply_effects(effects).await;
            }
        }
    }

    /// Activates the selection as soon as its first page lands.
    async fn load_first_page(&self, ticket: SelectionTicket) -> Result<SelectOutcome, ClientError> {
        let conversation_id = ticket.conversation_id;
        let page_result = self
            .api
            .fetch_messages(conversation_id, self.config.page_size, None)
            .await;

        let mut state = self.state.lock().await;
        if let Err(stale) = state.session.validate(ticket) {
            debug!(target: "Client/Session", "First page for {conversation_id} dropped: {stale}");
            return Ok(SelectOutcome::Superseded);
        }
        let page = match page_result {
            Ok(page) => page,
            Err(e) => {
                warn!(target: "Client/Session", "Loading {conversation_id} failed: {e}");
                return Err(e.into());
            }
        };
        if state.session.activate(ticket).is_err() {
            return Ok(SelectOutcome::Superseded);
        }
        let _ = state.reconciler.ingest_page(conversation_id, page);
        drop(state);

        self.dispatch_all(&[
            Event::ConversationActive { conversation_id },
            Event::TimelineChanged { conversation_id },
        ]);
        Ok(SelectOutcome::Active)
    }

    /// Fetches the page before the oldest loaded message. Returns how many
    /// messages were added; zero when there is nothing more, nothing is
    /// active, another load is in flight, or the selection changed meanwhile.
    pub async fn load_older(&self) -> Result<usize, ClientError> {
        let (ticket, before) = {
            let mut state = self.state.lock().await;
            let Some(cursor) = state.reconciler.timeline().map(|t| t.cursor()) else {
                return Ok(0);
            };
            if !cursor.has_more {
                return Ok(0);
            }
            let Some(ticket) = state.session.begin_load_older() else {
                debug!(target: "Client/Session", "Load older skipped: not active or already loading");
                return Ok(0);
            };
            (ticket, cursor.before)
        };

        let conversation_id = ticket.conversation_id;
        let result = self
            .api
            .fetch_messages(conversation_id, self.config.page_size, before)
            .await;

        let mut state = self.state.lock().await;
        if let Err(stale) = state.session.finish_load_older(ticket) {
            debug!(target: "Client/Session", "Older page for {conversation_id} dropped: {stale}");
            return Ok(0);
        }
        let page = result?;
        if state.reconciler.timeline().map(|t| t.cursor().before) != Some(before) {
            debug!(target: "Client/Session", "Older page for {conversation_id} dropped: history was replaced");
            return Ok(0);
        }
        let loaded_before = state.reconciler.timeline().map_or(0, |t| t.len());
        let outcome = state.reconciler.ingest_page(conversation_id, page);
        let added = state
            .reconciler
            .timeline()
            .map_or(0, |t| t.len())
            .saturating_sub(loaded_before);
        drop(state);

        if outcome.timeline_changed {
            self.event_bus
                .dispatch(&Event::TimelineChanged { conversation_id });
        }
        Ok(added)
    }

    /// Deselects. Anything still in flight for the old selection is ignored
    /// when it lands.
    pub async fn close(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().await;
            if let Some(previous) = state.local_typing.stop() {
                effects.outbound.push(OutboundEvent::Typing {
                    conversation_id: previous,
                    is_typing: false,
                });
            }
            let Some(previous) = state.session.close() else {
                return;
            };
            state.reconciler.close_timeline();
            if state.remote_typing.clear() {
                effects.event(Event::TypingChanged {
                    conversation_id: previous,
                    username: None,
                });
            }
            info!(target: "Client/Session", "Closed conversation {previous}");
        }
        self.typing_expiry.cancel();
        self.apply_effects(effects).await;
    }

    /// Opens (creating if needed) the conversation with a friend and selects it.
    pub async fn open_conversation_with(&self, peer: UserId) -> Result<SelectOutcome, ClientError> {
        let conversation = self.api.open_conversation(peer).await?;
        let conversation_id = conversation.id;
        let outcome = self
            .state
            .lock()
            .await
            .reconciler
            .insert_conversation(conversation);
        if outcome.directory_changed {
            self.event_bus.dispatch(&Event::ConversationsChanged);
        }
        self.select(conversation_id).await
    }

    /// After a reconnect: merges whatever arrived in the active conversation
    /// while the channel was down. When more than a page arrived, the loaded
    /// history restarts from the newest page so `load_older` walks back
    /// through the gap.
    pub(crate) async fn catch_up_active(&self) -> Result<(), ClientError> {
        let Some(ticket) = self.state.lock().await.session.current_ticket() else {
            return Ok(());
        };
        let conversation_id = ticket.conversation_id;
        let page = self
            .api
            .fetch_messages(conversation_id, self.config.page_size, None)
            .await?;

        let mut state = self.state.lock().await;
        if state.session.validate(ticket).is_err() {
            return Ok(());
        }
        let outcome = state.reconciler.ingest_recent(conversation_id, page);
        drop(state);
        if outcome.timeline_changed {
            self.event_bus
                .dispatch(&Event::TimelineChanged { conversation_id });
        }
        Ok(())
    }
}
