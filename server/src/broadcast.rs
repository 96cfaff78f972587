//! Outbound event fan-out.
//!
//! Handlers never touch sockets. They push `Outgoing` records into an
//! [`Outbox`]; the network layer drains it after each handler or tick and
//! resolves the target against the live connection set.

use shared::{ParticipantId, ServerEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    One(ParticipantId),
    Many(Vec<ParticipantId>),
    All,
    AllExcept(ParticipantId),
}

impl Target {
    pub fn includes(&self, id: ParticipantId) -> bool {
        match self {
            Target::One(target) => *target == id,
            Target::Many(targets) => targets.contains(&id),
            Target::All => true,
            Target::AllExcept(excluded) => *excluded != id,
        }
    }

    /// Scoped targets reach their recipients even before they join the world.
    pub fn is_scoped(&self) -> bool {
        matches!(self, Target::One(_) | Target::Many(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub event: ServerEvent,
}

#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, id: ParticipantId, event: ServerEvent) {
        self.push(Target::One(id), event);
    }

    pub fn send_many(&mut self, ids: Vec<ParticipantId>, event: ServerEvent) {
        if ids.is_empty() {
            return;
        }
        self.push(Target::Many(ids), event);
    }

    pub fn broadcast(&mut self, event: ServerEvent) {
        self.push(Target::All, event);
    }

    pub fn broadcast_except(&mut self, id: ParticipantId, event: ServerEvent) {
        self.push(Target::AllExcept(id), event);
    }

    pub fn push(&mut self, target: Target, event: ServerEvent) {
        self.messages.push(Outgoing { target, event });
    }

    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.messages)
    }

    /// Every event that would reach `id`, in emission order.
    pub fn events_for(&self, id: ParticipantId) -> Vec<&ServerEvent> {
        self.messages
            .iter()
            .filter(|m| m.target.includes(id))
            .map(|m| &m.event)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_except_skips_sender() {
        let mut outbox = Outbox::new();
        outbox.broadcast_except(1, ServerEvent::PlayerLeft { player_id: 9 });

        assert!(outbox.events_for(1).is_empty());
        assert_eq!(outbox.events_for(2).len(), 1);
    }

    #[test]
    fn test_send_many_ignores_empty_recipient_list() {
        let mut outbox = Outbox::new();
        outbox.send_many(vec![], ServerEvent::PartyDisbanded { party_id: 1 });
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_drain_empties_outbox() {
        let mut outbox = Outbox::new();
        outbox.send(3, ServerEvent::Pong { timestamp: 1 });
        outbox.broadcast(ServerEvent::PlayerLeft { player_id: 3 });

        let drained = outbox.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].target, Target::One(3));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_target_scoping() {
        assert!(Target::One(1).is_scoped());
        assert!(Target::Many(vec![1, 2]).is_scoped());
        assert!(!Target::All.is_scoped());
        assert!(!Target::AllExcept(1).is_scoped());
    }
}
