mod compose;
mod inbound;
mod session;

pub use session::SelectOutcome;

use crate::channel::ChannelSender;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::rest::DmApi;
use crate::timer::ScheduledTask;
use crate::types::events::{CoreEventBus, Event};
use dmcore::presence::PresenceSet;
use dmcore::protocol::OutboundEvent;
use dmcore::reconciler::{IngestOutcome, Reconciler};
use dmcore::session::{Session, SessionState};
use dmcore::timeline::PaginationCursor;
use dmcore::types::{Conversation, ConversationId, Message, UserBrief};
use dmcore::typing::{LocalTyping, RemoteTyping};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything the engine knows, guarded by a single lock that is never held
/// across a network call.
pub(crate) struct EngineState {
    pub(crate) reconciler: Reconciler,
    pub(crate) session: Session,
    pub(crate) local_typing: LocalTyping,
    pub(crate) remote_typing: RemoteTyping,
    pub(crate) presence: PresenceSet,
    pub(crate) draft: String,
}

/// Follow-up work produced while the state lock was held.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) events: Vec<Event>,
    pub(crate) outbound: Vec<OutboundEvent>,
    pub(crate) refresh: bool,
}

impl Effects {
    pub(crate) fn event(&mut self, event: Event) {
        let duplicate = matches!(event, Event::ConversationsChanged)
            && self
                .events
                .iter()
                .any(|e| matches!(e, Event::ConversationsChanged));
        if !duplicate {
            self.events.push(event);
        }
    }

    pub(crate) fn absorb(&mut self, outcome: IngestOutcome, timeline: Option<ConversationId>) {
        if outcome.directory_changed {
            self.event(Event::ConversationsChanged);
        }
        if outcome.timeline_changed
            && let Some(conversation_id) = timeline
        {
            self.event(Event::TimelineChanged { conversation_id });
        }
        self.refresh |= outcome.refresh_needed;
        if let Some(conversation_id) = outcome.read_receipt {
            self.outbound.push(OutboundEvent::Read { conversation_id });
        }
    }
}

/// The conversation session controller: owns the directory, the active
/// timeline, drafts, typing and presence state, and coordinates the write
/// path with the push channel.
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) api: Arc<dyn DmApi>,
    pub(crate) channel: Arc<dyn ChannelSender>,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) typing_expiry: ScheduledTask,
    pub event_bus: CoreEventBus,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn DmApi>,
        channel: Arc<dyn ChannelSender>,
    ) -> Arc<Self> {
        let state = EngineState {
            reconciler: Reconciler::new(),
            session: Session::new(),
            local_typing: LocalTyping::new(config.typing_throttle),
            remote_typing: RemoteTyping::new(),
            presence: PresenceSet::new(),
            draft: String::new(),
        };
        Arc::new(Self {
            config,
            api,
            channel,
            state: Mutex::new(state),
            typing_expiry: ScheduledTask::new("remote-typing-expiry"),
            event_bus: CoreEventBus::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn dispatch_all(&self, events: &[Event]) {
        for event in events {
            self.event_bus.dispatch(event);
        }
    }

    /// Publishes events, sends channel traffic and re-lists the directory if
    /// something unknown showed up.
    pub(crate) async fn apply_effects(&self, effects: Effects) {
        self.dispatch_all(&effects.events);
        for event in effects.outbound {
            self.channel.emit(event).await;
        }
        if effects.refresh
            && let Err(e) = self.refresh_conversations().await
        {
            warn!(target: "Client", "Directory refresh failed: {e}");
        }
    }

    /// Replaces the directory with the service's listing. A slower, older
    /// refresh never overwrites a newer one.
    pub async fn refresh_conversations(&self) -> Result<(), ClientError> {
        let ticket = self.state.lock().await.reconciler.begin_refresh();
        let conversations = self.api.list_conversations().await?;

        let mut state = self.state.lock().await;
        match state.reconciler.finish_refresh(ticket, conversations) {
            Ok(_) => {
                drop(state);
                self.event_bus.dispatch(&Event::ConversationsChanged);
            }
            Err(stale) => debug!(target: "Client", "Directory refresh discarded: {stale}"),
        }
        Ok(())
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state
            .lock()
            .await
            .reconciler
            .directory()
            .conversations()
            .to_vec()
    }

    pub async fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.state.lock().await.reconciler.directory().get(id).cloned()
    }

    /// Messages of the selected conversation, ascending by id.
    pub async fn timeline(&self) -> Vec<Message> {
        self.state
            .lock()
            .await
            .reconciler
            .timeline()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn cursor(&self) -> Option<PaginationCursor> {
        self.state
            .lock()
            .await
            .reconciler
            .timeline()
            .map(|t| t.cursor())
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.lock().await.session.state()
    }

    /// Who is typing in the selected conversation.
    pub async fn typing(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .remote_typing
            .username()
            .map(str::to_string)
    }

    pub async fn draft(&self) -> String {
        self.state.lock().await.draft.clone()
    }

    /// Sum of the directory's unread counts.
    pub async fn unread_total(&self) -> u32 {
        self.state.lock().await.reconciler.directory().total_unread()
    }

    /// The service's own unread total, for badges outside the inbox.
    pub async fn fetch_unread_total(&self) -> Result<u32, ClientError> {
        Ok(self.api.unread_total().await?)
    }

    /// People the user can start a conversation with.
    pub async fn friends(&self) -> Result<Vec<UserBrief>, ClientError> {
        Ok(self.api.list_friends().await?)
    }

    /// Ends the session: deselects, stops typing and closes presence.
    pub async fn shutdown(&self) {
        self.close().await;
        self.close_presence().await;
        self.typing_expiry.cancel();
    }
}
