use crate::types::ids::ConversationId;
use serde::Serialize;
use thiserror::Error;

/// An async result that resolved after the selection it was issued for was
/// replaced. It is dropped without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("result belongs to a superseded selection")]
pub struct StaleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "conversation_id", rename_all = "snake_case")]
pub enum SessionState {
    NoneSelected,
    /// Selected; waiting for the first page.
    Loading(ConversationId),
    Active(ConversationId),
}

impl SessionState {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match *self {
            SessionState::NoneSelected => None,
            SessionState::Loading(id) | SessionState::Active(id) => Some(id),
        }
    }
}

/// Carried by every request issued on behalf of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTicket {
    pub conversation_id: ConversationId,
    generation: u64,
}

/// Which conversation the user is looking at, plus the request generation
/// used to recognise late results.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    generation: u64,
    loading_older: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::NoneSelected,
            generation: 0,
            loading_older: false,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selected(&self) -> Option<ConversationId> {
        self.state.conversation_id()
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn select(&mut self, conversation_id: ConversationId) -> SelectionTicket {
        self.generation += 1;
        self.state = SessionState::Loading(conversation_id);
        self.loading_older = false;
        SelectionTicket {
            conversation_id,
            generation: self.generation,
        }
    }

    pub fn close(&mut self) -> Option<ConversationId> {
        let previous = self.selected();
        self.generation += 1;
        self.state = SessionState::NoneSelected;
        self.loading_older = false;
        previous
    }

    pub fn current_ticket(&self) -> Option<SelectionTicket> {
        self.selected().map(|conversation_id| SelectionTicket {
            conversation_id,
            generation: self.generation,
        })
    }

    pub fn validate(&self, ticket: SelectionTicket) -> Result<(), StaleResult> {
        if ticket.generation == self.generation && self.selected() == Some(ticket.conversation_id)
        {
            Ok(())
        } else {
            Err(StaleResult)
        }
    }

    /// The first page for `ticket` arrived.
    pub fn activate(&mut self, ticket: SelectionTicket) -> Result<(), StaleResult> {
        self.validate(ticket)?;
        self.state = SessionState::Active(ticket.conversation_id);
        Ok(())
    }

    /// Claims the single load-older slot. `None` unless active and idle.
    pub fn begin_load_older(&mut self) -> Option<SelectionTicket> {
        if self.loading_older || !matches!(self.state, SessionState::Active(_)) {
            return None;
        }
        self.loading_older = true;
        self.current_ticket()
    }

    /// Releases the load-older slot, whether the fetch succeeded or not.
    pub fn finish_load_older(&mut self, ticket: SelectionTicket) -> Result<(), StaleResult> {
        self.validate(ticket)?;
        self.loading_older = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switching_invalidates_earlier_tickets() {
        let mut s = Session::new();
        let a = s.select(ConversationId(1));
        let b = s.select(ConversationId(2));

        assert_eq!(s.activate(a), Err(StaleResult));
        assert_eq!(s.state(), SessionState::Loading(ConversationId(2)));
        assert!(s.activate(b).is_ok());
        assert_eq!(s.state(), SessionState::Active(ConversationId(2)));
    }

    #[test]
    fn reselecting_same_conversation_still_bumps_generation() {
        let mut s = Session::new();
        let first = s.select(ConversationId(1));
        let second = s.select(ConversationId(1));
        assert_eq!(s.validate(first), Err(StaleResult));
        assert!(s.validate(second).is_ok());
    }

    #[test]
    fn close_drops_everything_in_flight() {
        let mut s = Session::new();
        let t = s.select(ConversationId(3));
        assert_eq!(s.close(), Some(ConversationId(3)));
        assert_eq!(s.validate(t), Err(StaleResult));
        assert_eq!(s.state(), SessionState::NoneSelected);
        assert!(s.current_ticket().is_none());
    }

    #[test]
    fn load_older_is_single_flight_and_needs_active() {
        let mut s = Session::new();
        let t = s.select(ConversationId(1));
        assert!(s.begin_load_older().is_none());

        s.activate(t).unwrap();
        let older = s.begin_load_older().expect("slot should be free");
        assert!(s.begin_load_older().is_none());

        s.finish_load_older(older).unwrap();
        assert!(s.begin_load_older().is_some());
    }

    #[test]
    fn state_serializes_for_consumers() {
        assert_eq!(
            serde_json::to_string(&SessionState::Active(ConversationId(5))).unwrap(),
            r#"{"state":"active","conversation_id":5}"#
        );
        assert_eq!(
            serde_json::to_string(&SessionState::NoneSelected).unwrap(),
            r#"{"state":"none_selected"}"#
        );
    }
}
