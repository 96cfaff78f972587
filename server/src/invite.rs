//! Pending invites and requests with a per-tick expiry countdown.
//!
//! Party invites, guild invites and trade requests share this queue. `K` is
//! whatever the invite points at (party id, guild id, or `()` for trades).

use shared::ParticipantId;

pub const DEFAULT_INVITE_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvite<K> {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub target: K,
    pub remaining_ms: u64,
}

#[derive(Debug)]
pub struct InviteQueue<K> {
    pending: Vec<PendingInvite<K>>,
    timeout_ms: u64,
}

impl<K: Copy + PartialEq> InviteQueue<K> {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            pending: Vec::new(),
            timeout_ms,
        }
    }

    /// Queues an invite. A repeat from the same sender to the same recipient
    /// replaces the earlier one and restarts its countdown.
    pub fn push(&mut self, from: ParticipantId, to: ParticipantId, target: K) {
        self.pending.retain(|p| !(p.from == from && p.to == to));
        self.pending.push(PendingInvite {
            from,
            to,
            target,
            remaining_ms: self.timeout_ms,
        });
    }

    pub fn contains(&self, to: ParticipantId, target: K) -> bool {
        self.pending.iter().any(|p| p.to == to && p.target == target)
    }

    /// Removes and returns the invite addressed to `to` for `target`.
    pub fn take(&mut self, to: ParticipantId, target: K) -> Option<PendingInvite<K>> {
        let index = self
            .pending
            .iter()
            .position(|p| p.to == to && p.target == target)?;
        Some(self.pending.remove(index))
    }

    pub fn take_from(&mut self, from: ParticipantId, to: ParticipantId) -> Option<PendingInvite<K>> {
        let index = self
            .pending
            .iter()
            .position(|p| p.from == from && p.to == to)?;
        Some(self.pending.remove(index))
    }

    /// Drops everything sent by or addressed to `id`.
    pub fn remove_involving(&mut self, id: ParticipantId) -> Vec<PendingInvite<K>> {
        self.extract(|p| p.from == id || p.to == id)
    }

    /// Drops every invite pointing at `target`, e.g. a disbanded party.
    pub fn remove_target(&mut self, target: K) -> Vec<PendingInvite<K>> {
        self.extract(|p| p.target == target)
    }

    pub fn for_recipient(&self, to: ParticipantId) -> impl Iterator<Item = &PendingInvite<K>> {
        self.pending.iter().filter(move |p| p.to == to)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Advances every countdown and returns the invites that ran out.
    pub fn tick(&mut self, dt_ms: u64) -> Vec<PendingInvite<K>> {
        for invite in &mut self.pending {
            invite.remaining_ms = invite.remaining_ms.saturating_sub(dt_ms);
        }
        self.extract(|p| p.remaining_ms == 0)
    }

    fn extract(&mut self, mut matches: impl FnMut(&PendingInvite<K>) -> bool) -> Vec<PendingInvite<K>> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            if matches(&self.pending[index]) {
                removed.push(self.pending.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }
}
