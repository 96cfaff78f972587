//! Two-party trade negotiation.
//!
//! A request waits in the recipient's queue until accepted, declined or
//! expired. Accepting opens a session with two empty offers. Each side may
//! only rewrite its own offer, and rewriting clears that side's
//! confirmation. When both sides are confirmed the session leaves the
//! manager and is settled against the two inventories in one step.

use crate::error::{GameError, GameResult};
use crate::invite::{InviteQueue, PendingInvite};
use log::debug;
use shared::{ErrorCode, Inventory, ItemStack, ParticipantId, TradeOffer};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
    Active,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeSession {
    pub id: u32,
    pub a: ParticipantId,
    pub b: ParticipantId,
    pub offer_a: TradeOffer,
    pub offer_b: TradeOffer,
    pub state: TradeState,
}

impl TradeSession {
    fn new(id: u32, a: ParticipantId, b: ParticipantId) -> Self {
        Self {
            id,
            a,
            b,
            offer_a: TradeOffer::default(),
            offer_b: TradeOffer::default(),
            state: TradeState::Active,
        }
    }

    pub fn partner_of(&self, id: ParticipantId) -> Option<ParticipantId> {
        if id == self.a {
            Some(self.b)
        } else if id == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    pub fn offer_of(&self, id: ParticipantId) -> Option<&TradeOffer> {
        if id == self.a {
            Some(&self.offer_a)
        } else if id == self.b {
            Some(&self.offer_b)
        } else {
            None
        }
    }

    fn offer_mut(&mut self, id: ParticipantId) -> Option<&mut TradeOffer> {
        if id == self.a {
            Some(&mut self.offer_a)
        } else if id == self.b {
            Some(&mut self.offer_b)
        } else {
            None
        }
    }

    pub fn both_confirmed(&self) -> bool {
        self.offer_a.confirmed && self.offer_b.confirmed
    }
}

/// Post-settlement inventories for both sides.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub inventory_a: Inventory,
    pub inventory_b: Inventory,
}

/// Applies both offers to copies of the two inventories. Either every
/// transfer succeeds and the new inventories are returned, or nothing does
/// and the session is marked cancelled with a reason.
pub fn settle(
    session: &mut TradeSession,
    inventory_a: &Inventory,
    inventory_b: &Inventory,
) -> Result<Settlement, String> {
    let result = transfer(&session.offer_a, &session.offer_b, inventory_a, inventory_b);
    session.state = match result {
        Ok(_) => TradeState::Settled,
        Err(_) => TradeState::Cancelled,
    };
    result
}

fn transfer(
    offer_a: &TradeOffer,
    offer_b: &TradeOffer,
    inventory_a: &Inventory,
    inventory_b: &Inventory,
) -> Result<Settlement, String> {
    if !inventory_a.contains(&offer_a.items, offer_a.gold)
        || !inventory_b.contains(&offer_b.items, offer_b.gold)
    {
        return Err("offered items are no longer available".to_string());
    }

    let mut next_a = inventory_a.clone();
    let mut next_b = inventory_b.clone();
    take_offer(&mut next_a, offer_a)?;
    take_offer(&mut next_b, offer_b)?;

    if !next_a.can_accept(&offer_b.items) || !next_b.can_accept(&offer_a.items) {
        return Err("inventory is full".to_string());
    }
    give_offer(&mut next_a, offer_b)?;
    give_offer(&mut next_b, offer_a)?;

    Ok(Settlement {
        inventory_a: next_a,
        inventory_b: next_b,
    })
}

fn take_offer(inventory: &mut Inventory, offer: &TradeOffer) -> Result<(), String> {
    for stack in &offer.items {
        if !inventory.remove(stack) {
            return Err(format!("missing {} x{}", stack.item, stack.quantity));
        }
    }
    inventory.gold -= offer.gold;
    Ok(())
}

fn give_offer(inventory: &mut Inventory, offer: &TradeOffer) -> Result<(), String> {
    for stack in &offer.items {
        if !inventory.add(stack) {
            return Err("inventory is full".to_string());
        }
    }
    inventory.gold = inventory
        .gold
        .checked_add(offer.gold)
        .ok_or_else(|| "gold overflow".to_string())?;
    Ok(())
}

#[derive(Debug)]
pub struct TradeManager {
    requests: InviteQueue<()>,
    sessions: HashMap<u32, TradeSession>,
    by_participant: HashMap<ParticipantId, u32>,
    next_id: u32,
}

impl TradeManager {
    pub fn new(request_timeout_ms: u64) -> Self {
        Self {
            requests: InviteQueue::new(request_timeout_ms),
            sessions: HashMap::new(),
            by_participant: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn is_trading(&self, id: ParticipantId) -> bool {
        self.by_participant.contains_key(&id)
    }

    pub fn session_of(&self, id: ParticipantId) -> Option<&TradeSession> {
        self.by_participant
            .get(&id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    pub fn has_request(&self, from: ParticipantId, to: ParticipantId) -> bool {
        self.requests.for_recipient(to).any(|r| r.from == from)
    }

    pub fn request(&mut self, from: ParticipantId, to: ParticipantId) -> GameResult<()> {
        if from == to {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "cannot trade with yourself",
            ));
        }
        if self.is_trading(from) || self.is_trading(to) {
            return Err(GameError::invalid_state("already in a trade"));
        }
        self.requests.push(from, to, ());
        Ok(())
    }

    /// Opens a session and drops every other request involving either side.
    pub fn accept(&mut self, to: ParticipantId, from: ParticipantId) -> GameResult<&TradeSession> {
        if self.requests.take_from(from, to).is_none() {
            return Err(GameError::unknown_target(format!(
                "no trade request from {}",
                from
            )));
        }
        if self.is_trading(from) || self.is_trading(to) {
            return Err(GameError::invalid_state("already in a trade"));
        }

        self.requests.remove_involving(from);
        self.requests.remove_involving(to);

        let id = self.next_id;
        self.next_id += 1;
        self.by_participant.insert(from, id);
        self.by_participant.insert(to, id);
        debug!("Trade {} opened between {} and {}", id, from, to);
        Ok(&*self
            .sessions
            .entry(id)
            .or_insert_with(|| TradeSession::new(id, from, to)))
    }

    pub fn decline(&mut self, to: ParticipantId, from: ParticipantId) -> GameResult<()> {
        self.requests
            .take_from(from, to)
            .map(|_| ())
            .ok_or_else(|| GameError::unknown_target(format!("no trade request from {}", from)))
    }

    fn active_mut(&mut self, id: ParticipantId) -> GameResult<&mut TradeSession> {
        self.by_participant
            .get(&id)
            .and_then(|session_id| self.sessions.get_mut(session_id))
            .filter(|session| session.state == TradeState::Active)
            .ok_or_else(|| GameError::invalid_state("no active trade"))
    }

    /// Replaces the caller's offer wholesale. Returns the partner id and the
    /// new offer.
    pub fn update_offer(
        &mut self,
        id: ParticipantId,
        items: Vec<ItemStack>,
        gold: u64,
        inventory: &Inventory,
    ) -> GameResult<(ParticipantId, TradeOffer)> {
        if items.iter().any(|stack| stack.quantity == 0) {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "offered quantities must be positive",
            ));
        }
        if !inventory.contains(&items, gold) {
            return Err(GameError::protocol(
                ErrorCode::InsufficientItems,
                "you do not have what you offered",
            ));
        }

        let session = self.active_mut(id)?;
        let partner = session.partner_of(id).unwrap_or(id);
        let offer = session
            .offer_mut(id)
            .ok_or_else(|| GameError::invalid_state("no active trade"))?;
        *offer = TradeOffer {
            items,
            gold,
            confirmed: false,
        };
        Ok((partner, offer.clone()))
    }

    /// Sets the caller's confirmation. When both sides are confirmed the
    /// session is removed and handed back for settlement.
    pub fn set_confirmed(
        &mut self,
        id: ParticipantId,
        confirmed: bool,
    ) -> GameResult<(ParticipantId, Option<TradeSession>)> {
        let session = self.active_mut(id)?;
        let partner = session.partner_of(id).unwrap_or(id);
        if let Some(offer) = session.offer_mut(id) {
            offer.confirmed = confirmed;
        }
        if !session.both_confirmed() {
            return Ok((partner, None));
        }
        let session_id = session.id;
        Ok((partner, self.close(session_id)))
    }

    /// Either side may cancel an active session at any time.
    pub fn cancel(&mut self, id: ParticipantId) -> GameResult<TradeSession> {
        let session_id = self.active_mut(id)?.id;
        let mut session = self
            .close(session_id)
            .ok_or_else(|| GameError::invalid_state("no active trade"))?;
        session.state = TradeState::Cancelled;
        Ok(session)
    }

    /// Cancels the participant's session, if any, and drops their requests.
    pub fn on_disconnect(
        &mut self,
        id: ParticipantId,
    ) -> (Option<TradeSession>, Vec<PendingInvite<()>>) {
        let cancelled = self.cancel(id).ok();
        let requests = self.requests.remove_involving(id);
        (cancelled, requests)
    }

    pub fn tick(&mut self, dt_ms: u64) -> Vec<PendingInvite<()>> {
        self.requests.tick(dt_ms)
    }

    fn close(&mut self, session_id: u32) -> Option<TradeSession> {
        let session = self.sessions.remove(&session_id)?;
        self.by_participant.remove(&session.a);
        self.by_participant.remove(&session.b);
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ParticipantId = 1;
    const B: ParticipantId = 2;

    fn inventory(items: &[(&str, u32)], gold: u64) -> Inventory {
        let mut inventory = Inventory::default();
        for (item, quantity) in items {
            inventory.add(&ItemStack::new(*item, *quantity));
        }
        inventory.gold = gold;
        inventory
    }

    fn open_session(trades: &mut TradeManager) {
        trades.request(A, B).unwrap();
        trades.accept(B, A).unwrap();
    }

    #[test]
    fn test_accept_opens_empty_session() {
        let mut trades = TradeManager::new(30_000);
        trades.request(A, B).unwrap();
        trades.request(3, B).unwrap();

        let session = trades.accept(B, A).unwrap();
        assert_eq!(session.state, TradeState::Active);
        assert_eq!(session.offer_a, TradeOffer::default());
        assert_eq!(session.offer_b, TradeOffer::default());

        assert!(!trades.has_request(3, B));
        assert!(trades.accept(B, 3).is_err());
    }

    #[test]
    fn test_decline_discards_request() {
        let mut trades = TradeManager::new(30_000);
        trades.request(A, B).unwrap();
        trades.decline(B, A).unwrap();

        assert!(!trades.has_request(A, B));
        assert!(trades.accept(B, A).is_err());
        assert!(!trades.is_trading(A));
    }

    #[test]
    fn test_offer_update_clears_only_own_confirmation() {
        let mut trades = TradeManager::new(30_000);
        let inv_a = inventory(&[("sword", 1)], 200);
        let inv_b = inventory(&[("shield", 1)], 80);
        open_session(&mut trades);

        trades
            .update_offer(A, vec![ItemStack::new("sword", 1)], 100, &inv_a)
            .unwrap();
        trades.set_confirmed(A, true).unwrap();
        trades.update_offer(B, vec![], 50, &inv_b).unwrap();

        let session = trades.session_of(A).unwrap();
        assert!(session.offer_a.confirmed);
        assert!(!session.offer_b.confirmed);

        trades.update_offer(A, vec![], 10, &inv_a).unwrap();
        let session = trades.session_of(A).unwrap();
        assert!(!session.offer_a.confirmed);
        assert_eq!(session.offer_a.gold, 10);
        assert!(session.offer_a.items.is_empty());
    }

    #[test]
    fn test_offer_beyond_inventory_rejected() {
        let mut trades = TradeManager::new(30_000);
        open_session(&mut trades);
        let inv_a = inventory(&[("sword", 1)], 10);

        let err = trades
            .update_offer(A, vec![ItemStack::new("sword", 2)], 0, &inv_a)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientItems);
        assert!(trades.update_offer(A, vec![], 11, &inv_a).is_err());
    }

    #[test]
    fn test_overflowing_duplicate_stacks_rejected() {
        let mut trades = TradeManager::new(30_000);
        open_session(&mut trades);
        let empty = Inventory::default();

        let err = trades
            .update_offer(
                A,
                vec![ItemStack::new("potion", u32::MAX), ItemStack::new("potion", 1)],
                0,
                &empty,
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientItems);
        assert_eq!(trades.session_of(A).unwrap().offer_a, TradeOffer::default());
    }

    #[test]
    fn test_double_confirm_settles() {
        let mut trades = TradeManager::new(30_000);
        let inv_a = inventory(&[("sword", 1)], 300);
        let inv_b = inventory(&[("shield", 1)], 70);
        open_session(&mut trades);

        trades
            .update_offer(A, vec![ItemStack::new("sword", 1)], 100, &inv_a)
            .unwrap();
        let (_, ready) = trades.set_confirmed(A, true).unwrap();
        assert!(ready.is_none());
        trades
            .update_offer(B, vec![ItemStack::new("shield", 1)], 50, &inv_b)
            .unwrap();
        let (partner, ready) = trades.set_confirmed(B, true).unwrap();
        assert_eq!(partner, A);

        let mut session = ready.unwrap();
        let settlement = settle(&mut session, &inv_a, &inv_b).unwrap();
        assert_eq!(session.state, TradeState::Settled);

        assert_eq!(settlement.inventory_a.quantity_of("sword"), 0);
        assert_eq!(settlement.inventory_a.quantity_of("shield"), 1);
        assert_eq!(settlement.inventory_a.gold, 250);
        assert_eq!(settlement.inventory_b.quantity_of("sword"), 1);
        assert_eq!(settlement.inventory_b.quantity_of("shield"), 0);
        assert_eq!(settlement.inventory_b.gold, 120);

        let err = trades.update_offer(A, vec![], 0, &inv_a).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert!(!trades.is_trading(A));
        assert!(!trades.is_trading(B));
    }

    #[test]
    fn test_settlement_overflow_changes_nothing() {
        let mut trades = TradeManager::new(30_000);
        let inv_a = inventory(&[("gem", 3)], 40);
        let mut inv_b = Inventory::with_capacity(1);
        inv_b.add(&ItemStack::new("rope", 1));
        inv_b.gold = 5;
        open_session(&mut trades);

        trades
            .update_offer(A, vec![ItemStack::new("gem", 3)], 40, &inv_a)
            .unwrap();
        trades.set_confirmed(A, true).unwrap();
        let (_, ready) = trades.set_confirmed(B, true).unwrap();
        let mut session = ready.unwrap();

        let before = (inv_a.clone(), inv_b.clone());
        let reason = settle(&mut session, &inv_a, &inv_b).unwrap_err();
        assert_eq!(reason, "inventory is full");
        assert_eq!(session.state, TradeState::Cancelled);
        assert_eq!((inv_a, inv_b), before);
    }

    #[test]
    fn test_cancel_is_final() {
        let mut trades = TradeManager::new(30_000);
        open_session(&mut trades);

        let session = trades.cancel(B).unwrap();
        assert_eq!(session.state, TradeState::Cancelled);
        assert!(trades.cancel(A).is_err());
        assert!(trades.set_confirmed(A, true).is_err());
    }

    #[test]
    fn test_disconnect_cancels_session_and_requests() {
        let mut trades = TradeManager::new(30_000);
        open_session(&mut trades);
        trades.request(3, 4).unwrap();
        trades.request(4, 3).unwrap();

        let (cancelled, requests) = trades.on_disconnect(A);
        assert_eq!(cancelled.map(|s| s.partner_of(A)), Some(Some(B)));
        assert!(requests.is_empty());

        let (cancelled, requests) = trades.on_disconnect(3);
        assert!(cancelled.is_none());
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn test_busy_participant_cannot_be_requested() {
        let mut trades = TradeManager::new(30_000);
        open_session(&mut trades);
        assert!(trades.request(3, A).is_err());
        assert!(trades.request(A, A).is_err());
    }

    #[test]
    fn test_requests_expire() {
        let mut trades = TradeManager::new(1_000);
        trades.request(A, B).unwrap();
        assert!(trades.tick(999).is_empty());
        let expired = trades.tick(1);
        assert_eq!(expired.len(), 1);
        assert!(trades.accept(B, A).is_err());
    }
}
