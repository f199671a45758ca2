use crate::client::{Client, Effects};
use crate::error::ClientError;
use crate::types::events::{Event, SendFailed};
use dmcore::protocol::OutboundEvent;
use dmcore::types::Message;
use log::{info, warn};

impl Client {
    /// Replaces the draft. Typing in an active conversation announces it to
    /// the peer, throttled; clearing the draft withdraws the announcement.
    pub async fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        let mut outbound = None;
        {
            let mut state = self.state.lock().await;
            let selected = state.session.selected();
            if text.is_empty() {
                if let Some(conversation_id) = state.local_typing.stop() {
                    outbound = Some(OutboundEvent::Typing {
                        conversation_id,
                        is_typing: false,
                    });
                }
            } else if let Some(conversation_id) = selected {
                let now = tokio::time::Instant::now().into_std();
                if state.local_typing.on_input(conversation_id, now) {
                    outbound = Some(OutboundEvent::Typing {
                        conversation_id,
                        is_typing: true,
                    });
                }
            }
            state.draft = text;
        }
        if let Some(event) = outbound {
            self.channel.emit(event).await;
        }
    }

    /// The composer lost focus.
    pub async fn blur_draft(&self) {
        self.stop_typing().await;
    }

    /// Sends the trimmed draft. An empty draft is a no-op returning `None`.
    ///
    /// On failure the text goes back into the draft unless something new was
    /// typed meanwhile, and a [`Event::SendFailed`] notice is published.
    pub async fn send_draft(&self) -> Result<Option<Message>, ClientError> {
        let mut effects = Effects::default();
        let (conversation_id, body) = {
            let mut state = self.state.lock().await;
            let body = state.draft.trim().to_string();
            if body.is_empty() {
                return Ok(None);
            }
            let conversation_id = state
                .session
                .selected()
                .ok_or(ClientError::NoActiveConversation)?;
            state.draft.clear();
            if let Some(previous) = state.local_typing.stop() {
                effects.outbound.push(OutboundEvent::Typing {
                    conversation_id: previous,
                    is_typing: false,
                });
            }
            (conversation_id, body)
        };
        self.apply_effects(effects).await;

        let message = match self.api.send_message(conversation_id, &body).await {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "Client/Compose", "Send to {conversation_id} failed: {e}");
                let draft_restored = {
                    let mut state = self.state.lock().await;
                    let restore = state.draft.is_empty();
                    if restore {
                        state.draft = body.clone();
                    }
                    restore
                };
                self.event_bus.dispatch(&Event::SendFailed(SendFailed {
                    conversation_id,
                    body,
                    reason: e.to_string(),
                    draft_restored,
                }));
                return Err(e.into());
            }
        };
        info!(target: "Client/Compose", "Sent message {} to {conversation_id}", message.id);

        let mut effects = Effects::default();
        {
            let mut state = self.state.lock().await;
            let active = state.reconciler.active_conversation();
            let outcome = state.reconciler.ingest_sent(message.clone());
            effects.absorb(outcome, active);
        }
        effects.outbound.push(OutboundEvent::NotifyDm {
            conversation_id,
            message: message.clone(),
        });
        self.apply_effects(effects).await;
        Ok(Some(message))
    }

    /// Sets the draft to `body` and sends it.
    pub async fn send_text(&self, body: impl Into<String>) -> Result<Option<Message>, ClientError> {
        self.state.lock().await.draft = body.into();
        self.send_draft().await
    }
}
