//! Client-side mirror of the authoritative world.
//!
//! The local participant is predicted: movement is applied as soon as it is
//! sent, and because the server never echoes a participant's own movement,
//! deltas cannot fight the prediction. Only a full `sync:state` (or a
//! respawn) moves the local participant. Remote participants and monsters
//! glide toward their last reported position.

use shared::{
    distance, ChatChannel, Direction, ErrorCode, GroundItem, GuildInfo, GuildRank, Inventory,
    ItemId, MatchRoomInfo, MonsterId, MonsterSnapshot, ParticipantId, PartyInfo, PlayerSnapshot,
    ServerEvent, TradeOffer, ATTACK_VISUAL_MS,
};
use std::collections::{HashMap, VecDeque};

/// Share of the remaining gap closed per second of interpolation.
pub const INTERPOLATION_RATE: f32 = 12.0;
/// Gaps wider than this are snapped instead of smoothed.
pub const SNAP_DISTANCE: f32 = 200.0;
const CHAT_HISTORY: usize = 50;

/// A rendered position chasing the last reported one.
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothed<T> {
    pub state: T,
    pub target_x: f32,
    pub target_y: f32,
}

trait Positioned {
    fn position(&self) -> (f32, f32);
    fn set_position(&mut self, x: f32, y: f32);
}

impl Positioned for PlayerSnapshot {
    fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    fn set_position(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }
}

impl Positioned for MonsterSnapshot {
    fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    fn set_position(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }
}

impl<T: Positioned> Smoothed<T> {
    fn snapped(state: T) -> Self {
        let (target_x, target_y) = state.position();
        Self {
            state,
            target_x,
            target_y,
        }
    }

    fn retarget(&mut self, x: f32, y: f32) {
        self.target_x = x;
        self.target_y = y;
    }

    fn snap(&mut self) {
        self.state.set_position(self.target_x, self.target_y);
    }

    fn advance(&mut self, dt_secs: f32) {
        let (x, y) = self.state.position();
        let gap = distance(x, y, self.target_x, self.target_y);
        if gap > SNAP_DISTANCE || gap < 0.01 {
            self.snap();
            return;
        }
        let alpha = (dt_secs * INTERPOLATION_RATE).min(1.0);
        self.state.set_position(
            x + (self.target_x - x) * alpha,
            y + (self.target_y - y) * alpha,
        );
    }
}

fn attack_visual_secs() -> f32 {
    ATTACK_VISUAL_MS as f32 / 1000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeView {
    pub partner_id: ParticipantId,
    pub partner_name: String,
    pub own: TradeOffer,
    pub theirs: TradeOffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    pub from_name: String,
    pub channel: ChatChannel,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct WorldMirror {
    self_id: Option<ParticipantId>,
    local: Option<PlayerSnapshot>,
    exp: u32,
    players: HashMap<ParticipantId, Smoothed<PlayerSnapshot>>,
    /// Seconds left on each remote attack animation.
    attack_timers: HashMap<ParticipantId, f32>,
    monsters: HashMap<MonsterId, Smoothed<MonsterSnapshot>>,
    items: HashMap<ItemId, GroundItem>,
    pub inventory: Inventory,

    pub party: Option<PartyInfo>,
    pub party_invites: Vec<(u32, ParticipantId)>,
    pub guild: Option<GuildInfo>,
    pub guild_invites: Vec<(u32, String)>,
    pub trade: Option<TradeView>,
    pub trade_requests: Vec<ParticipantId>,
    pub room: Option<MatchRoomInfo>,

    pub chat: VecDeque<ChatLine>,
    pub last_error: Option<(ErrorCode, String)>,
    pub last_pong: Option<u64>,
}

impl WorldMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn self_id(&self) -> Option<ParticipantId> {
        self.self_id
    }

    /// The predicted local participant.
    pub fn local(&self) -> Option<&PlayerSnapshot> {
        self.local.as_ref()
    }

    pub fn exp(&self) -> u32 {
        self.exp
    }

    pub fn remote(&self, id: ParticipantId) -> Option<&PlayerSnapshot> {
        self.players.get(&id).map(|p| &p.state)
    }

    pub fn remote_count(&self) -> usize {
        self.players.len()
    }

    pub fn monster(&self, id: MonsterId) -> Option<&MonsterSnapshot> {
        self.monsters.get(&id).map(|m| &m.state)
    }

    pub fn monsters(&self) -> impl Iterator<Item = &MonsterSnapshot> {
        self.monsters.values().map(|m| &m.state)
    }

    pub fn items(&self) -> impl Iterator<Item = &GroundItem> {
        self.items.values()
    }

    /// Everyone to draw this frame, local participant first.
    pub fn render_players(&self) -> Vec<PlayerSnapshot> {
        let mut remotes: Vec<PlayerSnapshot> =
            self.players.values().map(|p| p.state.clone()).collect();
        remotes.sort_by_key(|p| p.id);
        self.local.iter().cloned().chain(remotes).collect()
    }

    /// Applies local movement immediately.
    pub fn predict_move(&mut self, x: f32, y: f32, direction: Direction, is_moving: bool) {
        if let Some(local) = &mut self.local {
            let (x, y) = shared::clamp_to_world(x, y);
            local.x = x;
            local.y = y;
            local.direction = direction;
            local.is_moving = is_moving;
        }
    }

    /// Moves remote entities toward their last reported positions and runs
    /// down attack animations.
    pub fn advance(&mut self, dt_secs: f32) {
        for player in self.players.values_mut() {
            player.advance(dt_secs);
        }
        let players = &mut self.players;
        self.attack_timers.retain(|id, remaining| {
            *remaining -= dt_secs;
            if *remaining > 0.0 {
                return true;
            }
            if let Some(player) = players.get_mut(id) {
                player.state.is_attacking = false;
            }
            false
        });
        for monster in self.monsters.values_mut() {
            monster.advance(dt_secs);
        }
    }

    fn is_self(&self, id: ParticipantId) -> bool {
        self.self_id == Some(id)
    }

    fn own_name(&self) -> Option<&str> {
        self.local.as_ref().map(|p| p.name.as_str())
    }

    fn reseed(
        &mut self,
        self_id: ParticipantId,
        players: &[PlayerSnapshot],
        monsters: &[MonsterSnapshot],
        items: &[GroundItem],
    ) {
        self.self_id = Some(self_id);
        self.local = players.iter().find(|p| p.id == self_id).cloned();
        self.players = players
            .iter()
            .filter(|p| p.id != self_id)
            .map(|p| (p.id, Smoothed::snapped(p.clone())))
            .collect();
        self.attack_timers = self
            .players
            .values()
            .filter(|p| p.state.is_attacking)
            .map(|p| (p.state.id, attack_visual_secs()))
            .collect();
        self.monsters = monsters
            .iter()
            .map(|m| (m.id, Smoothed::snapped(m.clone())))
            .collect();
        self.items = items.iter().map(|i| (i.id, i.clone())).collect();
    }

    /// Folds one server event into the mirror.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::SyncState {
                self_id,
                players,
                monsters,
                items,
            } => self.reseed(*self_id, players, monsters, items),
            ServerEvent::Pong { timestamp } => self.last_pong = Some(*timestamp),
            ServerEvent::Error { code, message } => {
                self.last_error = Some((*code, message.clone()));
            }

            ServerEvent::PlayerJoined { player } => {
                if !self.is_self(player.id) {
                    self.players
                        .insert(player.id, Smoothed::snapped(player.clone()));
                }
            }
            ServerEvent::PlayerLeft { player_id } => {
                self.players.remove(player_id);
                self.attack_timers.remove(player_id);
            }
            ServerEvent::PlayerMoved {
                player_id,
                x,
                y,
                direction,
                is_moving,
            } => {
                if let Some(player) = self.players.get_mut(player_id) {
                    player.retarget(*x, *y);
                    player.state.direction = *direction;
                    player.state.is_moving = *is_moving;
                }
            }
            ServerEvent::PlayerAttacked {
                player_id,
                direction,
                ..
            } => {
                if let Some(player) = self.players.get_mut(player_id) {
                    player.state.direction = *direction;
                    player.state.is_attacking = true;
                    self.attack_timers.insert(*player_id, attack_visual_secs());
                }
            }
            ServerEvent::PlayerDamaged { player_id, hp, .. } => {
                self.with_player(*player_id, |p| p.hp = *hp);
            }
            ServerEvent::PlayerRespawned {
                player_id,
                x,
                y,
                hp,
            } => {
                if self.is_self(*player_id) {
                    if let Some(local) = &mut self.local {
                        local.x = *x;
                        local.y = *y;
                        local.hp = *hp;
                        local.is_moving = false;
                    }
                } else if let Some(player) = self.players.get_mut(player_id) {
                    player.retarget(*x, *y);
                    player.snap();
                    player.state.hp = *hp;
                }
            }
            ServerEvent::PlayerLevelUp {
                player_id,
                level,
                max_hp,
            } => {
                self.with_player(*player_id, |p| {
                    p.level = *level;
                    p.max_hp = *max_hp;
                    p.hp = *max_hp;
                });
            }
            ServerEvent::ExpGained { total, level, .. } => {
                self.exp = *total;
                if let Some(local) = &mut self.local {
                    local.level = *level;
                }
            }
            ServerEvent::InventoryUpdated { inventory } => self.inventory = inventory.clone(),

            ServerEvent::MonsterUpdate { monsters } => {
                for snapshot in monsters {
                    self.upsert_monster(snapshot);
                }
            }
            ServerEvent::MonsterDamaged { monster_id, hp, .. } => {
                if let Some(monster) = self.monsters.get_mut(monster_id) {
                    monster.state.hp = *hp;
                }
            }
            ServerEvent::MonsterKilled { monster_id, .. } => {
                if let Some(monster) = self.monsters.get_mut(monster_id) {
                    monster.state.hp = 0;
                    monster.state.alive = false;
                }
            }

            ServerEvent::ChatMessage {
                from_name,
                channel,
                message,
                ..
            } => {
                if self.chat.len() == CHAT_HISTORY {
                    self.chat.pop_front();
                }
                self.chat.push_back(ChatLine {
                    from_name: from_name.clone(),
                    channel: *channel,
                    message: message.clone(),
                });
            }

            // Joining drops every other pending invite server-side too.
            ServerEvent::PartyCreated { party } | ServerEvent::PartyJoined { party } => {
                self.party_invites.clear();
                self.party = Some(party.clone());
            }
            ServerEvent::PartyInvited {
                party_id, from_id, ..
            } => self.party_invites.push((*party_id, *from_id)),
            ServerEvent::PartyInviteDeclined { .. } => {}
            ServerEvent::PartyInviteExpired {
                party_id,
                target_id,
            } => {
                if self.is_self(*target_id) {
                    self.party_invites.retain(|(id, _)| id != party_id);
                }
            }
            ServerEvent::PartyMemberJoined { party_id, member } => {
                if let Some(party) = self.party.as_mut().filter(|p| p.id == *party_id) {
                    party.members.retain(|m| m.id != member.id);
                    party.members.push(member.clone());
                }
            }
            ServerEvent::PartyMemberLeft { member_id, .. } => {
                if self.is_self(*member_id) {
                    self.party = None;
                } else if let Some(party) = &mut self.party {
                    party.members.retain(|m| m.id != *member_id);
                }
            }
            ServerEvent::PartyLeaderChanged {
                party_id,
                leader_id,
            } => {
                if let Some(party) = self.party.as_mut().filter(|p| p.id == *party_id) {
                    party.leader = *leader_id;
                }
            }
            ServerEvent::PartyMemberUpdated { party_id, member } => {
                if let Some(party) = self.party.as_mut().filter(|p| p.id == *party_id) {
                    if let Some(slot) = party.members.iter_mut().find(|m| m.id == member.id) {
                        *slot = member.clone();
                    }
                }
            }
            ServerEvent::PartyDisbanded { party_id } => {
                if self.party.as_ref().is_some_and(|p| p.id == *party_id) {
                    self.party = None;
                }
            }

            ServerEvent::GuildCreated { guild } | ServerEvent::GuildInfo { guild } => {
                self.guild_invites.clear();
                self.guild = Some(guild.clone());
            }
            ServerEvent::GuildInvited {
                guild_id,
                guild_name,
                ..
            } => self.guild_invites.push((*guild_id, guild_name.clone())),
            ServerEvent::GuildInviteDeclined { .. } => {}
            ServerEvent::GuildInviteExpired { guild_id, .. } => {
                self.guild_invites.retain(|(id, _)| id != guild_id);
            }
            ServerEvent::GuildMemberJoined { guild_id, member } => {
                if let Some(guild) = self.guild.as_mut().filter(|g| g.id == *guild_id) {
                    guild.members.retain(|m| m.name != member.name);
                    guild.members.push(member.clone());
                }
            }
            ServerEvent::GuildMemberLeft { name, .. } => {
                if self.own_name() == Some(name.as_str()) {
                    self.guild = None;
                } else if let Some(guild) = &mut self.guild {
                    guild.members.retain(|m| &m.name != name);
                }
            }
            ServerEvent::GuildRankChanged {
                guild_id,
                name,
                rank,
            } => {
                if let Some(guild) = self.guild.as_mut().filter(|g| g.id == *guild_id) {
                    if let Some(member) = guild.members.iter_mut().find(|m| &m.name == name) {
                        member.rank = *rank;
                    }
                    if *rank == GuildRank::Leader {
                        guild.leader = name.clone();
                    }
                }
            }
            ServerEvent::GuildMemberOnline {
                guild_id,
                name,
                online,
            } => {
                if let Some(guild) = self.guild.as_mut().filter(|g| g.id == *guild_id) {
                    if let Some(member) = guild.members.iter_mut().find(|m| &m.name == name) {
                        member.online = *online;
                    }
                }
            }
            ServerEvent::GuildDisbanded { guild_id } => {
                if self.guild.as_ref().is_some_and(|g| g.id == *guild_id) {
                    self.guild = None;
                }
            }

            ServerEvent::TradeRequested { from_id, .. } => {
                self.trade_requests.retain(|id| id != from_id);
                self.trade_requests.push(*from_id);
            }
            ServerEvent::TradeRequestDeclined { .. } => {}
            ServerEvent::TradeRequestExpired { other_id } => {
                self.trade_requests.retain(|id| id != other_id);
            }
            ServerEvent::TradeStarted {
                partner_id,
                partner_name,
            } => {
                self.trade_requests.clear();
                self.trade = Some(TradeView {
                    partner_id: *partner_id,
                    partner_name: partner_name.clone(),
                    own: TradeOffer::default(),
                    theirs: TradeOffer::default(),
                });
            }
            ServerEvent::TradeOfferUpdated { player_id, offer } => {
                let own = self.is_self(*player_id);
                if let Some(trade) = &mut self.trade {
                    let side = if own { &mut trade.own } else { &mut trade.theirs };
                    *side = offer.clone();
                }
            }
            ServerEvent::TradeConfirmChanged {
                player_id,
                confirmed,
            } => {
                let own = self.is_self(*player_id);
                if let Some(trade) = &mut self.trade {
                    let side = if own { &mut trade.own } else { &mut trade.theirs };
                    side.confirmed = *confirmed;
                }
            }
            ServerEvent::TradeCompleted { .. } | ServerEvent::TradeCancelled { .. } => {
                self.trade = None;
            }

            ServerEvent::ItemDropped { item } => {
                self.items.insert(item.id, item.clone());
            }
            ServerEvent::ItemPickedUp { item_id, .. } | ServerEvent::ItemExpired { item_id } => {
                self.items.remove(item_id);
            }

            ServerEvent::MatchRoomUpdated { room }
            | ServerEvent::MatchStarted { room }
            | ServerEvent::MatchFound { room } => self.room = Some(room.clone()),
            ServerEvent::MatchLeft { .. } => self.room = None,
            ServerEvent::MatchSearching { .. } | ServerEvent::MatchSearchCancelled => {}
        }
    }

    fn with_player(&mut self, id: ParticipantId, update: impl FnOnce(&mut PlayerSnapshot)) {
        if self.is_self(id) {
            if let Some(local) = &mut self.local {
                update(local);
            }
        } else if let Some(player) = self.players.get_mut(&id) {
            update(&mut player.state);
        }
    }

    fn upsert_monster(&mut self, snapshot: &MonsterSnapshot) {
        match self.monsters.get_mut(&snapshot.id) {
            Some(monster) => {
                let revived = !monster.state.alive && snapshot.alive;
                let (x, y) = monster.state.position();
                monster.state = MonsterSnapshot {
                    x,
                    y,
                    ..snapshot.clone()
                };
                monster.retarget(snapshot.x, snapshot.y);
                if revived || !snapshot.alive {
                    monster.snap();
                }
            }
            None => {
                self.monsters
                    .insert(snapshot.id, Smoothed::snapped(snapshot.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{JobClass, MonsterKind, MonsterState, PartyMember};

    fn player(id: ParticipantId, name: &str, x: f32, y: f32) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            name: name.to_string(),
            job: JobClass::Warrior,
            x,
            y,
            direction: Direction::Down,
            is_moving: false,
            level: 1,
            hp: 150,
            max_hp: 150,
            is_attacking: false,
        }
    }

    fn slime(id: MonsterId, x: f32, y: f32) -> MonsterSnapshot {
        MonsterSnapshot {
            id,
            kind: MonsterKind::Slime,
            x,
            y,
            hp: 50,
            max_hp: 50,
            alive: true,
            state: MonsterState::Idle,
            boss: false,
        }
    }

    fn seeded() -> WorldMirror {
        let mut mirror = WorldMirror::new();
        mirror.apply(&ServerEvent::SyncState {
            self_id: 1,
            players: vec![player(1, "me", 10.0, 10.0), player(2, "you", 100.0, 100.0)],
            monsters: vec![slime(1, 300.0, 300.0)],
            items: vec![],
        });
        mirror
    }

    #[test]
    fn test_sync_state_seeds_mirror() {
        let mirror = seeded();
        assert_eq!(mirror.self_id(), Some(1));
        assert_eq!(mirror.local().map(|p| p.name.as_str()), Some("me"));
        assert_eq!(mirror.remote_count(), 1);
        assert!(mirror.monster(1).is_some());
        assert_eq!(mirror.render_players()[0].id, 1);
    }

    #[test]
    fn test_prediction_survives_deltas() {
        let mut mirror = seeded();
        mirror.predict_move(40.0, 10.0, Direction::Right, true);

        // Nothing the server sends about others touches the local position.
        mirror.apply(&ServerEvent::PlayerMoved {
            player_id: 2,
            x: 120.0,
            y: 100.0,
            direction: Direction::Right,
            is_moving: true,
        });
        mirror.apply(&ServerEvent::PlayerDamaged {
            player_id: 1,
            monster_id: 1,
            damage: 5,
            hp: 145,
        });

        let local = mirror.local().unwrap();
        assert_eq!((local.x, local.y), (40.0, 10.0));
        assert_eq!(local.hp, 145);
    }

    #[test]
    fn test_resync_overrides_prediction() {
        let mut mirror = seeded();
        mirror.predict_move(500.0, 500.0, Direction::Up, true);
        mirror.apply(&ServerEvent::SyncState {
            self_id: 1,
            players: vec![player(1, "me", 12.0, 14.0)],
            monsters: vec![],
            items: vec![],
        });
        let local = mirror.local().unwrap();
        assert_eq!((local.x, local.y), (12.0, 14.0));
        assert_eq!(mirror.remote_count(), 0);
    }

    #[test]
    fn test_remote_interpolates_toward_target() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::PlayerMoved {
            player_id: 2,
            x: 150.0,
            y: 100.0,
            direction: Direction::Right,
            is_moving: true,
        });
        assert_eq!(mirror.remote(2).unwrap().x, 100.0);

        mirror.advance(0.05);
        let x = mirror.remote(2).unwrap().x;
        assert_approx_eq!(x, 100.0 + 50.0 * 0.6, 0.001);

        for _ in 0..100 {
            mirror.advance(0.05);
        }
        assert_approx_eq!(mirror.remote(2).unwrap().x, 150.0, 0.01);
    }

    #[test]
    fn test_large_gap_snaps() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::PlayerMoved {
            player_id: 2,
            x: 900.0,
            y: 100.0,
            direction: Direction::Right,
            is_moving: true,
        });
        mirror.advance(0.01);
        assert_eq!(mirror.remote(2).unwrap().x, 900.0);
    }

    #[test]
    fn test_remote_attack_animation_ends() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::PlayerAttacked {
            player_id: 2,
            direction: Direction::Left,
            target_monster_ids: vec![1],
        });
        assert!(mirror.remote(2).unwrap().is_attacking);
        assert_eq!(mirror.remote(2).unwrap().direction, Direction::Left);

        mirror.advance(0.2);
        assert!(mirror.remote(2).unwrap().is_attacking);
        mirror.advance(0.15);
        assert!(!mirror.remote(2).unwrap().is_attacking);

        for _ in 0..100 {
            mirror.advance(0.05);
        }
        assert!(!mirror.remote(2).unwrap().is_attacking);
    }

    #[test]
    fn test_withdrawn_invites_leave_the_views() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::TradeRequested {
            from_id: 2,
            from_name: "you".to_string(),
        });
        mirror.apply(&ServerEvent::PartyInvited {
            party_id: 4,
            from_id: 2,
            from_name: "you".to_string(),
        });
        mirror.apply(&ServerEvent::GuildInvited {
            guild_id: 6,
            guild_name: "Wardens".to_string(),
            from_name: "you".to_string(),
        });

        mirror.apply(&ServerEvent::TradeRequestExpired { other_id: 2 });
        mirror.apply(&ServerEvent::PartyInviteExpired {
            party_id: 4,
            target_id: 1,
        });
        mirror.apply(&ServerEvent::GuildInviteExpired {
            guild_id: 6,
            target_name: "me".to_string(),
        });
        assert!(mirror.trade_requests.is_empty());
        assert!(mirror.party_invites.is_empty());
        assert!(mirror.guild_invites.is_empty());
    }

    #[test]
    fn test_monster_death_and_respawn() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::MonsterKilled {
            monster_id: 1,
            killer_id: 1,
            exp: 25,
        });
        assert!(!mirror.monster(1).unwrap().alive);

        let mut respawned = slime(1, 300.0, 300.0);
        respawned.x = 280.0;
        mirror.apply(&ServerEvent::MonsterUpdate {
            monsters: vec![respawned],
        });
        let monster = mirror.monster(1).unwrap();
        assert!(monster.alive);
        assert_eq!(monster.x, 280.0);
    }

    #[test]
    fn test_party_views_follow_notifications() {
        let mut mirror = seeded();
        let member = |id, name: &str| PartyMember {
            id,
            name: name.to_string(),
            job: JobClass::Warrior,
            level: 1,
            hp: 150,
            max_hp: 150,
            online: true,
        };
        mirror.apply(&ServerEvent::PartyInvited {
            party_id: 3,
            from_id: 2,
            from_name: "you".to_string(),
        });
        assert_eq!(mirror.party_invites, vec![(3, 2)]);

        mirror.apply(&ServerEvent::PartyJoined {
            party: PartyInfo {
                id: 3,
                leader: 2,
                members: vec![member(2, "you"), member(1, "me")],
            },
        });
        assert!(mirror.party_invites.is_empty());

        mirror.apply(&ServerEvent::PartyMemberLeft {
            party_id: 3,
            member_id: 2,
            kicked: false,
        });
        mirror.apply(&ServerEvent::PartyLeaderChanged {
            party_id: 3,
            leader_id: 1,
        });
        let party = mirror.party.as_ref().unwrap();
        assert_eq!(party.leader, 1);
        assert_eq!(party.members.len(), 1);

        mirror.apply(&ServerEvent::PartyDisbanded { party_id: 3 });
        assert!(mirror.party.is_none());
    }

    #[test]
    fn test_trade_view_tracks_both_sides() {
        let mut mirror = seeded();
        mirror.apply(&ServerEvent::TradeStarted {
            partner_id: 2,
            partner_name: "you".to_string(),
        });
        mirror.apply(&ServerEvent::TradeOfferUpdated {
            player_id: 2,
            offer: TradeOffer {
                items: vec![],
                gold: 40,
                confirmed: false,
            },
        });
        mirror.apply(&ServerEvent::TradeConfirmChanged {
            player_id: 1,
            confirmed: true,
        });

        let trade = mirror.trade.as_ref().unwrap();
        assert_eq!(trade.theirs.gold, 40);
        assert!(trade.own.confirmed);
        assert!(!trade.theirs.confirmed);

        mirror.apply(&ServerEvent::TradeCancelled {
            reason: "you disconnected".to_string(),
        });
        assert!(mirror.trade.is_none());
    }

    #[test]
    fn test_chat_history_is_capped() {
        let mut mirror = seeded();
        for n in 0..(CHAT_HISTORY + 5) {
            mirror.apply(&ServerEvent::ChatMessage {
                from_id: 2,
                from_name: "you".to_string(),
                channel: ChatChannel::Global,
                message: format!("line {}", n),
            });
        }
        assert_eq!(mirror.chat.len(), CHAT_HISTORY);
        assert_eq!(mirror.chat.front().unwrap().message, "line 5");
    }
}
