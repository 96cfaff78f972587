//! Party membership: one leader, up to four members, leader-issued invites.

use crate::error::{GameError, GameResult};
use crate::invite::{InviteQueue, PendingInvite};
use log::debug;
use shared::{ErrorCode, ParticipantId, PartyInfo, PartyMember, PARTY_CAPACITY};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct Party {
    pub id: u32,
    pub leader: ParticipantId,
    /// Join order; the front is the earliest joiner.
    pub members: Vec<ParticipantId>,
}

impl Party {
    pub fn is_full(&self) -> bool {
        self.members.len() >= PARTY_CAPACITY
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.contains(&id)
    }

    pub fn info(&self, lookup: impl Fn(ParticipantId) -> Option<PartyMember>) -> PartyInfo {
        PartyInfo {
            id: self.id,
            leader: self.leader,
            members: self.members.iter().filter_map(|id| lookup(*id)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveOutcome {
    Left {
        party_id: u32,
        /// Set when the leaver was the leader.
        new_leader: Option<ParticipantId>,
        remaining: Vec<ParticipantId>,
    },
    Disbanded {
        party_id: u32,
        former: Vec<ParticipantId>,
        /// Invites that pointed at the party.
        withdrawn: Vec<PendingInvite<u32>>,
    },
}

#[derive(Debug)]
pub struct PartyManager {
    parties: BTreeMap<u32, Party>,
    by_member: HashMap<ParticipantId, u32>,
    invites: InviteQueue<u32>,
    next_id: u32,
}

impl PartyManager {
    pub fn new(invite_timeout_ms: u64) -> Self {
        Self {
            parties: BTreeMap::new(),
            by_member: HashMap::new(),
            invites: InviteQueue::new(invite_timeout_ms),
            next_id: 1,
        }
    }

    pub fn get(&self, party_id: u32) -> Option<&Party> {
        self.parties.get(&party_id)
    }

    pub fn party_of(&self, id: ParticipantId) -> Option<&Party> {
        self.by_member
            .get(&id)
            .and_then(|party_id| self.parties.get(party_id))
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    pub fn has_invite(&self, to: ParticipantId, party_id: u32) -> bool {
        self.invites.contains(to, party_id)
    }

    pub fn create(&mut self, founder: ParticipantId) -> GameResult<&Party> {
        if self.by_member.contains_key(&founder) {
            return Err(GameError::invalid_state("already in a party"));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.by_member.insert(founder, id);
        debug!("Party {} created by {}", id, founder);
        Ok(&*self.parties.entry(id).or_insert(Party {
            id,
            leader: founder,
            members: vec![founder],
        }))
    }

    pub fn invite(&mut self, from: ParticipantId, target: ParticipantId) -> GameResult<u32> {
        let party = self
            .party_of(from)
            .ok_or_else(|| GameError::invalid_state("not in a party"))?;
        if party.leader != from {
            return Err(GameError::unauthorized("only the party leader can invite"));
        }
        if target == from || party.contains(target) {
            return Err(GameError::invalid_state("already a member"));
        }
        if self.by_member.contains_key(&target) {
            return Err(GameError::invalid_state("target is already in a party"));
        }
        if party.is_full() {
            return Err(GameError::capacity(ErrorCode::PartyFull, "party is full"));
        }
        let party_id = party.id;
        self.invites.push(from, target, party_id);
        Ok(party_id)
    }

    /// Joins the invited party. Returns `Ok(None)` when the party filled up
    /// or disbanded while the invite was pending.
    pub fn accept(&mut self, target: ParticipantId, party_id: u32) -> GameResult<Option<&Party>> {
        if self.invites.take(target, party_id).is_none() {
            return Err(GameError::unknown_target(format!(
                "no invite to party {}",
                party_id
            )));
        }
        if self.by_member.contains_key(&target) {
            return Err(GameError::invalid_state("already in a party"));
        }
        let Some(party) = self.parties.get_mut(&party_id) else {
            return Ok(None);
        };
        if party.is_full() {
            return Ok(None);
        }

        party.members.push(target);
        self.by_member.insert(target, party_id);
        self.invites.remove_involving(target);
        Ok(self.parties.get(&party_id))
    }

    /// Returns the inviter so they can be told.
    pub fn decline(&mut self, target: ParticipantId, party_id: u32) -> GameResult<ParticipantId> {
        self.invites
            .take(target, party_id)
            .map(|invite| invite.from)
            .ok_or_else(|| GameError::unknown_target(format!("no invite to party {}", party_id)))
    }

    pub fn leave(&mut self, id: ParticipantId) -> GameResult<LeaveOutcome> {
        let party_id = *self
            .by_member
            .get(&id)
            .ok_or_else(|| GameError::invalid_state("not in a party"))?;
        Ok(self.remove_member(party_id, id))
    }

    pub fn kick(&mut self, leader: ParticipantId, target: ParticipantId) -> GameResult<LeaveOutcome> {
        let party = self
            .party_of(leader)
            .ok_or_else(|| GameError::invalid_state("not in a party"))?;
        if party.leader != leader {
            return Err(GameError::unauthorized("only the party leader can kick"));
        }
        if target == leader {
            return Err(GameError::invalid_state("the leader cannot kick themselves"));
        }
        if !party.contains(target) {
            return Err(GameError::unknown_target(format!(
                "{} is not in your party",
                target
            )));
        }
        let party_id = party.id;
        Ok(self.remove_member(party_id, target))
    }

    /// Leaves the party (if any) and drops pending invites.
    pub fn on_disconnect(
        &mut self,
        id: ParticipantId,
    ) -> (Option<LeaveOutcome>, Vec<PendingInvite<u32>>) {
        let outcome = self.leave(id).ok();
        let invites = self.invites.remove_involving(id);
        (outcome, invites)
    }

    pub fn tick(&mut self, dt_ms: u64) -> Vec<PendingInvite<u32>> {
        self.invites.tick(dt_ms)
    }

    /// Removal and leadership hand-off happen together.
    fn remove_member(&mut self, party_id: u32, id: ParticipantId) -> LeaveOutcome {
        self.by_member.remove(&id);
        let Some(party) = self.parties.get_mut(&party_id) else {
            return LeaveOutcome::Disbanded {
                party_id,
                former: vec![id],
                withdrawn: Vec::new(),
            };
        };
        party.members.retain(|member| *member != id);

        if party.members.is_empty() {
            self.parties.remove(&party_id);
            let withdrawn = self.invites.remove_target(party_id);
            debug!("Party {} disbanded", party_id);
            return LeaveOutcome::Disbanded {
                party_id,
                former: vec![id],
                withdrawn,
            };
        }

        let mut new_leader = None;
        if party.leader == id {
            party.leader = party.members[0];
            new_leader = Some(party.leader);
        }
        LeaveOutcome::Left {
            party_id,
            new_leader,
            remaining: party.members.clone(),
        }
    }
}
