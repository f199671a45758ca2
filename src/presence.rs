use crate::client::Client;
use crate::error::ClientError;
use crate::types::events::Event;
use dmcore::presence::PresenceDelta;
use dmcore::types::UserId;
use log::{debug, info, warn};

impl Client {
    /// Loads the online snapshot once. Deltas pushed while it is in flight
    /// are replayed on top of it.
    pub async fn seed_presence(&self) -> Result<(), ClientError> {
        let Some(ticket) = self.state.lock().await.presence.begin_seed() else {
            debug!(target: "Client/Presence", "Presence closed, not seeding");
            return Ok(());
        };

        let snapshot = match self.api.online_friends().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(target: "Client/Presence", "Fetching online friends failed: {e}");
                self.state.lock().await.presence.abandon_seed(ticket);
                return Err(e.into());
            }
        };

        let seeded = {
            let mut state = self.state.lock().await;
            let result = state.presence.finish_seed(ticket, snapshot);
            result.map(|()| state.presence.len())
        };
        match seeded {
            Ok(online) => {
                info!(target: "Client/Presence", "{online} friends online");
                self.event_bus.dispatch(&Event::PresenceChanged {
                    user_id: None,
                    online: true,
                });
            }
            Err(stale) => debug!(target: "Client/Presence", "Presence snapshot dropped: {stale}"),
        }
        Ok(())
    }

    pub(crate) async fn apply_presence(&self, delta: PresenceDelta) {
        let changed = self.state.lock().await.presence.apply(delta);
        if !changed {
            return;
        }
        let (user_id, online) = match delta {
            PresenceDelta::Online(user) => (user, true),
            PresenceDelta::Offline(user) => (user, false),
        };
        debug!(target: "Client/Presence", "User {user_id} is now {}", if online { "online" } else { "offline" });
        self.event_bus.dispatch(&Event::PresenceChanged {
            user_id: Some(user_id),
            online,
        });
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.state.lock().await.presence.is_online(user)
    }

    pub async fn online_peers(&self) -> Vec<UserId> {
        let mut online: Vec<UserId> = self.state.lock().await.presence.online().collect();
        online.sort();
        online
    }

    /// Empties the set for good; late snapshots and deltas are ignored.
    pub(crate) async fn close_presence(&self) {
        self.state.lock().await.presence.close();
    }
}
