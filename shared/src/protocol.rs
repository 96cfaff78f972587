//! Wire protocol: one enum variant per catalog event.
//!
//! Clients only ever send [`ClientEvent`] and servers only ever send
//! [`ServerEvent`]. Both are encoded with bincode inside length-prefixed
//! frames (see [`crate::codec`]). `name()` returns the catalog name used in
//! logs, e.g. `player:move`.

use crate::inventory::Inventory;
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    Join {
        name: String,
        job: JobClass,
        x: f32,
        y: f32,
    },
    Move {
        x: f32,
        y: f32,
        direction: Direction,
        is_moving: bool,
    },
    Attack {
        direction: Direction,
        target_monster_ids: Vec<MonsterId>,
    },
    /// Client-computed hit. Only `monster_id` and `damage` are trusted; the
    /// rest mirrors what the client predicted and is ignored by the server.
    MonsterDamage {
        monster_id: MonsterId,
        damage: i32,
        new_hp: i32,
        killed: bool,
        exp: u32,
    },
    ChatSend {
        message: String,
        channel: ChatChannel,
        target_id: Option<ParticipantId>,
    },
    Respawn {
        x: f32,
        y: f32,
    },
    SyncRequest,
    Ping {
        timestamp: u64,
    },
    Leave,

    PartyCreate,
    PartyInvite {
        target_id: ParticipantId,
    },
    PartyInviteAccept {
        party_id: u32,
    },
    PartyInviteDecline {
        party_id: u32,
    },
    PartyLeave,
    PartyKick {
        target_id: ParticipantId,
    },

    GuildCreate {
        name: String,
        description: String,
    },
    GuildInvite {
        target_character_id: String,
    },
    GuildInviteAccept {
        guild_id: u32,
    },
    GuildInviteDecline {
        guild_id: u32,
    },
    GuildKick {
        target_id: String,
    },
    GuildPromote {
        target_id: String,
        rank: GuildRank,
    },
    GuildTransferLeader {
        target_id: String,
    },
    GuildDisband,
    GuildLeave,

    TradeRequest {
        target_id: ParticipantId,
    },
    TradeAccept {
        from_id: ParticipantId,
    },
    TradeDecline {
        from_id: ParticipantId,
    },
    TradeUpdateOffer {
        items: Vec<ItemStack>,
        gold: u64,
    },
    TradeConfirm,
    TradeUnconfirm,
    TradeCancel,

    ItemPickup {
        item_id: ItemId,
    },

    MatchCreate {
        name: String,
        max_players: u8,
    },
    MatchJoin {
        room_id: u32,
    },
    MatchLeave,
    MatchReady {
        ready: bool,
    },
    MatchStart,
    MatchSearch,
    MatchCancelSearch,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "player:join",
            ClientEvent::Move { .. } => "player:move",
            ClientEvent::Attack { .. } => "player:attack",
            ClientEvent::MonsterDamage { .. } => "monster:damage",
            ClientEvent::ChatSend { .. } => "chat:send",
            ClientEvent::Respawn { .. } => "player:respawn",
            ClientEvent::SyncRequest => "sync:request",
            ClientEvent::Ping { .. } => "ping",
            ClientEvent::Leave => "player:leave",
            ClientEvent::PartyCreate => "party:create",
            ClientEvent::PartyInvite { .. } => "party:invite",
            ClientEvent::PartyInviteAccept { .. } => "party:invite_accept",
            ClientEvent::PartyInviteDecline { .. } => "party:invite_decline",
            ClientEvent::PartyLeave => "party:leave",
            ClientEvent::PartyKick { .. } => "party:kick",
            ClientEvent::GuildCreate { .. } => "guild:create",
            ClientEvent::GuildInvite { .. } => "guild:invite",
            ClientEvent::GuildInviteAccept { .. } => "guild:invite_accept",
            ClientEvent::GuildInviteDecline { .. } => "guild:invite_decline",
            ClientEvent::GuildKick { .. } => "guild:kick",
            ClientEvent::GuildPromote { .. } => "guild:promote",
            ClientEvent::GuildTransferLeader { .. } => "guild:transfer_leader",
            ClientEvent::GuildDisband => "guild:disband",
            ClientEvent::GuildLeave => "guild:leave",
            ClientEvent::TradeRequest { .. } => "trade:request",
            ClientEvent::TradeAccept { .. } => "trade:accept",
            ClientEvent::TradeDecline { .. } => "trade:decline",
            ClientEvent::TradeUpdateOffer { .. } => "trade:update_offer",
            ClientEvent::TradeConfirm => "trade:confirm",
            ClientEvent::TradeUnconfirm => "trade:unconfirm",
            ClientEvent::TradeCancel => "trade:cancel",
            ClientEvent::ItemPickup { .. } => "item:pickup",
            ClientEvent::MatchCreate { .. } => "match:create",
            ClientEvent::MatchJoin { .. } => "match:join",
            ClientEvent::MatchLeave => "match:leave",
            ClientEvent::MatchReady { .. } => "match:ready",
            ClientEvent::MatchStart => "match:start",
            ClientEvent::MatchSearch => "match:search",
            ClientEvent::MatchCancelSearch => "match:cancel_search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Full snapshot; sent on join and on `sync:request`.
    SyncState {
        self_id: ParticipantId,
        players: Vec<PlayerSnapshot>,
        monsters: Vec<MonsterSnapshot>,
        items: Vec<GroundItem>,
    },
    Pong {
        timestamp: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },

    PlayerJoined {
        player: PlayerSnapshot,
    },
    PlayerLeft {
        player_id: ParticipantId,
    },
    PlayerMoved {
        player_id: ParticipantId,
        x: f32,
        y: f32,
        direction: Direction,
        is_moving: bool,
    },
    PlayerAttacked {
        player_id: ParticipantId,
        direction: Direction,
        target_monster_ids: Vec<MonsterId>,
    },
    PlayerDamaged {
        player_id: ParticipantId,
        monster_id: MonsterId,
        damage: i32,
        hp: i32,
    },
    PlayerRespawned {
        player_id: ParticipantId,
        x: f32,
        y: f32,
        hp: i32,
    },
    PlayerLevelUp {
        player_id: ParticipantId,
        level: u32,
        max_hp: i32,
    },
    ExpGained {
        amount: u32,
        total: u32,
        level: u32,
    },
    InventoryUpdated {
        inventory: Inventory,
    },

    MonsterUpdate {
        monsters: Vec<MonsterSnapshot>,
    },
    MonsterDamaged {
        monster_id: MonsterId,
        attacker_id: ParticipantId,
        damage: i32,
        hp: i32,
    },
    MonsterKilled {
        monster_id: MonsterId,
        killer_id: ParticipantId,
        exp: u32,
    },

    ChatMessage {
        from_id: ParticipantId,
        from_name: String,
        channel: ChatChannel,
        message: String,
    },

    PartyCreated {
        party: PartyInfo,
    },
    PartyInvited {
        party_id: u32,
        from_id: ParticipantId,
        from_name: String,
    },
    PartyInviteDeclined {
        party_id: u32,
        by_id: ParticipantId,
    },
    PartyInviteExpired {
        party_id: u32,
        target_id: ParticipantId,
    },
    PartyJoined {
        party: PartyInfo,
    },
    PartyMemberJoined {
        party_id: u32,
        member: PartyMember,
    },
    PartyMemberLeft {
        party_id: u32,
        member_id: ParticipantId,
        kicked: bool,
    },
    PartyLeaderChanged {
        party_id: u32,
        leader_id: ParticipantId,
    },
    PartyMemberUpdated {
        party_id: u32,
        member: PartyMember,
    },
    PartyDisbanded {
        party_id: u32,
    },

    GuildCreated {
        guild: GuildInfo,
    },
    GuildInfo {
        guild: GuildInfo,
    },
    GuildInvited {
        guild_id: u32,
        guild_name: String,
        from_name: String,
    },
    GuildInviteDeclined {
        guild_id: u32,
        by_name: String,
    },
    GuildInviteExpired {
        guild_id: u32,
        target_name: String,
    },
    GuildMemberJoined {
        guild_id: u32,
        member: GuildMember,
    },
    GuildMemberLeft {
        guild_id: u32,
        name: String,
        kicked: bool,
    },
    GuildRankChanged {
        guild_id: u32,
        name: String,
        rank: GuildRank,
    },
    GuildMemberOnline {
        guild_id: u32,
        name: String,
        online: bool,
    },
    GuildDisbanded {
        guild_id: u32,
    },

    TradeRequested {
        from_id: ParticipantId,
        from_name: String,
    },
    TradeRequestDeclined {
        by_id: ParticipantId,
    },
    TradeRequestExpired {
        other_id: ParticipantId,
    },
    TradeStarted {
        partner_id: ParticipantId,
        partner_name: String,
    },
    TradeOfferUpdated {
        player_id: ParticipantId,
        offer: TradeOffer,
    },
    TradeConfirmChanged {
        player_id: ParticipantId,
        confirmed: bool,
    },
    TradeCompleted {
        received_items: Vec<ItemStack>,
        received_gold: u64,
    },
    TradeCancelled {
        reason: String,
    },

    ItemDropped {
        item: GroundItem,
    },
    ItemPickedUp {
        item_id: ItemId,
        player_id: ParticipantId,
    },
    ItemExpired {
        item_id: ItemId,
    },

    MatchRoomUpdated {
        room: MatchRoomInfo,
    },
    MatchLeft {
        room_id: u32,
    },
    MatchStarted {
        room: MatchRoomInfo,
    },
    MatchSearching {
        queued: usize,
    },
    MatchSearchCancelled,
    MatchFound {
        room: MatchRoomInfo,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SyncState { .. } => "sync:state",
            ServerEvent::Pong { .. } => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::PlayerJoined { .. } => "player:joined",
            ServerEvent::PlayerLeft { .. } => "player:left",
            ServerEvent::PlayerMoved { .. } => "player:moved",
            ServerEvent::PlayerAttacked { .. } => "player:attacked",
            ServerEvent::PlayerDamaged { .. } => "player:damaged",
            ServerEvent::PlayerRespawned { .. } => "player:respawned",
            ServerEvent::PlayerLevelUp { .. } => "player:level_up",
            ServerEvent::ExpGained { .. } => "player:exp",
            ServerEvent::InventoryUpdated { .. } => "inventory:updated",
            ServerEvent::MonsterUpdate { .. } => "monster:update",
            ServerEvent::MonsterDamaged { .. } => "monster:damaged",
            ServerEvent::MonsterKilled { .. } => "monster:killed",
            ServerEvent::ChatMessage { .. } => "chat:message",
            ServerEvent::PartyCreated { .. } => "party:created",
            ServerEvent::PartyInvited { .. } => "party:invited",
            ServerEvent::PartyInviteDeclined { .. } => "party:invite_declined",
            ServerEvent::PartyInviteExpired { .. } => "party:invite_expired",
            ServerEvent::PartyJoined { .. } => "party:joined",
            ServerEvent::PartyMemberJoined { .. } => "party:member_joined",
            ServerEvent::PartyMemberLeft { .. } => "party:member_left",
            ServerEvent::PartyLeaderChanged { .. } => "party:leader_changed",
            ServerEvent::PartyMemberUpdated { .. } => "party:member_updated",
            ServerEvent::PartyDisbanded { .. } => "party:disbanded",
            ServerEvent::GuildCreated { .. } => "guild:created",
            ServerEvent::GuildInfo { .. } => "guild:info",
            ServerEvent::GuildInvited { .. } => "guild:invited",
            ServerEvent::GuildInviteDeclined { .. } => "guild:invite_declined",
            ServerEvent::GuildInviteExpired { .. } => "guild:invite_expired",
            ServerEvent::GuildMemberJoined { .. } => "guild:member_joined",
            ServerEvent::GuildMemberLeft { .. } => "guild:member_left",
            ServerEvent::GuildRankChanged { .. } => "guild:rank_changed",
            ServerEvent::GuildMemberOnline { .. } => "guild:member_online",
            ServerEvent::GuildDisbanded { .. } => "guild:disbanded",
            ServerEvent::TradeRequested { .. } => "trade:requested",
            ServerEvent::TradeRequestDeclined { .. } => "trade:request_declined",
            ServerEvent::TradeRequestExpired { .. } => "trade:request_expired",
            ServerEvent::TradeStarted { .. } => "trade:started",
            ServerEvent::TradeOfferUpdated { .. } => "trade:offer_updated",
            ServerEvent::TradeConfirmChanged { .. } => "trade:confirm_changed",
            ServerEvent::TradeCompleted { .. } => "trade:completed",
            ServerEvent::TradeCancelled { .. } => "trade:cancelled",
            ServerEvent::ItemDropped { .. } => "item:dropped",
            ServerEvent::ItemPickedUp { .. } => "item:picked_up",
            ServerEvent::ItemExpired { .. } => "item:expired",
            ServerEvent::MatchRoomUpdated { .. } => "match:room_updated",
            ServerEvent::MatchLeft { .. } => "match:left",
            ServerEvent::MatchStarted { .. } => "match:started",
            ServerEvent::MatchSearching { .. } => "match:searching",
            ServerEvent::MatchSearchCancelled => "match:search_cancelled",
            ServerEvent::MatchFound { .. } => "match:found",
        }
    }
}
