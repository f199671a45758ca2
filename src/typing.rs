use crate::client::Client;
use crate::types::events::Event;
use dmcore::protocol::{OutboundEvent, TypingSignal};
use dmcore::typing::RemoteTypingUpdate;
use log::trace;
use std::sync::Arc;

impl Client {
    /// A peer's typing signal. Only the active conversation is tracked; a
    /// start (re)arms the expiry timer.
    pub(crate) async fn handle_remote_typing(self: &Arc<Self>, signal: TypingSignal) {
        let update = {
            let mut state = self.state.lock().await;
            let active = state.reconciler.active_conversation();
            state.remote_typing.on_signal(active, &signal)
        };
        let conversation_id = signal.conversation_id;

        match update {
            RemoteTypingUpdate::Started { username, token } => {
                let weak = Arc::downgrade(self);
                self.typing_expiry
                    .schedule(self.config.typing_timeout, async move {
                        if let Some(client) = weak.upgrade() {
                            client.expire_remote_typing(token).await;
                        }
                    });
                self.event_bus.dispatch(&Event::TypingChanged {
                    conversation_id,
                    username: Some(username),
                });
            }
            RemoteTypingUpdate::Cleared => {
                self.typing_expiry.cancel();
                self.event_bus.dispatch(&Event::TypingChanged {
                    conversation_id,
                    username: None,
                });
            }
            RemoteTypingUpdate::Unchanged => {
                trace!(target: "Client/Typing", "Typing signal for {conversation_id} ignored");
            }
        }
    }

    async fn expire_remote_typing(&self, token: u64) {
        let expired = {
            let mut state = self.state.lock().await;
            let conversation_id = state.remote_typing.conversation_id();
            conversation_id.filter(|_| state.remote_typing.expire(token))
        };
        if let Some(conversation_id) = expired {
            trace!(target: "Client/Typing", "Typing indicator for {conversation_id} expired");
            self.event_bus.dispatch(&Event::TypingChanged {
                conversation_id,
                username: None,
            });
        }
    }

    /// Withdraws our typing signal if one is outstanding.
    pub async fn stop_typing(&self) {
        let owed = self.state.lock().await.local_typing.stop();
        if let Some(conversation_id) = owed {
            self.channel
                .emit(OutboundEvent::Typing {
                    conversation_id,
                    is_typing: false,
                })
                .await;
        }
    }
}
