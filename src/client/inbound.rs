use crate::client::{Client, Effects};
use crate::types::events::Event;
use dmcore::presence::PresenceDelta;
use dmcore::protocol::{ChannelEvent, InboundEvent};
use log::{debug, info, warn};
use std::sync::Arc;

impl Client {
    /// Applies one push-channel event. Called by a single pump task, so
    /// events are applied in arrival order.
    pub async fn handle_channel_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { resumed } => {
                self.event_bus.dispatch(&Event::ChannelConnected);
                if resumed {
                    info!(target: "Client/Inbound", "Channel resumed, reconciling with the service");
                    if let Err(e) = self.refresh_conversations().await {
                        warn!(target: "Client/Inbound", "Directory refresh after reconnect failed: {e}");
                    }
                    if let Err(e) = self.catch_up_active().await {
                        warn!(target: "Client/Inbound", "Catch-up after reconnect failed: {e}");
                    }
                }
            }
            ChannelEvent::Disconnected { reason } => {
                debug!(target: "Client/Inbound", "Channel down: {reason}");
                self.event_bus.dispatch(&Event::ChannelDisconnected);
            }
            ChannelEvent::Rejected { reason } => {
                self.event_bus.dispatch(&Event::ChannelRejected { reason });
            }
            ChannelEvent::Inbound(inbound) => self.handle_inbound(inbound).await,
        }
    }

    async fn handle_inbound(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::NewMessage(message) => {
                let mut effects = Effects::default();
                {
                    let mut state = self.state.lock().await;
                    let active = state.reconciler.active_conversation();
                    let outcome = state.reconciler.ingest_pushed(message);
                    effects.absorb(outcome, active);
                }
                self.apply_effects(effects).await;
            }
            InboundEvent::Typing(signal) => self.handle_remote_typing(signal).await,
            InboundEvent::MessagesRead(receipt) => {
                let mut effects = Effects::default();
                {
                    let mut state = self.state.lock().await;
                    let outcome = state.reconciler.apply_read_receipt(&receipt);
                    effects.absorb(outcome, Some(receipt.conversation_id));
                }
                self.apply_effects(effects).await;
            }
            InboundEvent::FriendOnline(user) => {
                self.apply_presence(PresenceDelta::Online(user)).await;
            }
            InboundEvent::FriendOffline(user) => {
                self.apply_presence(PresenceDelta::Offline(user)).await;
            }
            InboundEvent::ServerError(_) => {}
        }
    }
}
