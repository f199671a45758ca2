use crate::session::StaleResult;
use crate::types::ids::UserId;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceDelta {
    Online(UserId),
    Offline(UserId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedTicket(u64);

#[derive(Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Seeding(u64),
    Closed,
}

/// Online peers. Seeded from a snapshot, then kept current by deltas.
#[derive(Debug, Default)]
pub struct PresenceSet {
    online: HashSet<UserId>,
    phase: Phase,
    generation: u64,
    /// Deltas seen while a snapshot is in flight, replayed over it.
    pending: Vec<PresenceDelta>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    pub fn online(&self) -> impl Iterator<Item = UserId> + '_ {
        self.online.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// `None` once closed.
    pub fn begin_seed(&mut self) -> Option<SeedTicket> {
        if self.is_closed() {
            return None;
        }
        self.generation += 1;
        self.phase = Phase::Seeding(self.generation);
        self.pending.clear();
        Some(SeedTicket(self.generation))
    }

    /// Replaces the set with the snapshot and replays what arrived meanwhile.
    pub fn finish_seed(
        &mut self,
        ticket: SeedTicket,
        snapshot: impl IntoIterator<Item = UserId>,
    ) -> Result<(), StaleResult> {
        if self.phase != Phase::Seeding(ticket.0) {
            return Err(StaleResult);
        }
        self.online = snapshot.into_iter().collect();
        for delta in std::mem::take(&mut self.pending) {
            self.apply_now(delta);
        }
        self.phase = Phase::Idle;
        Ok(())
    }

    /// Gives up on an in-flight snapshot but keeps the deltas applied so far.
    pub fn abandon_seed(&mut self, ticket: SeedTicket) {
        if self.phase == Phase::Seeding(ticket.0) {
            self.phase = Phase::Idle;
            self.pending.clear();
        }
    }

    /// Returns whether the visible set changed.
    pub fn apply(&mut self, delta: PresenceDelta) -> bool {
        match self.phase {
            Phase::Closed => false,
            Phase::Seeding(_) => {
                self.pending.push(delta);
                self.apply_now(delta)
            }
            Phase::Idle => self.apply_now(delta),
        }
    }

    fn apply_now(&mut self, delta: PresenceDelta) -> bool {
        match delta {
            PresenceDelta::Online(user) => self.online.insert(user),
            PresenceDelta::Offline(user) => self.online.remove(&user),
        }
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.online.clear();
        self.pending.clear();
    }
}
