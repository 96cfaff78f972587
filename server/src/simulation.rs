//! The authoritative simulation.
//!
//! One task owns a [`Simulation`] and feeds it client events and ticks in
//! the order they arrive. Every handler runs to completion before the next
//! one starts, so the stores below need no locking. Handlers never touch the
//! network; they push outgoing events into an [`Outbox`].

use crate::broadcast::Outbox;
use crate::chat;
use crate::combat;
use crate::config::ServerConfig;
use crate::error::{GameError, GameResult};
use crate::guild::{Character, Guild, GuildManager};
use crate::invite::PendingInvite;
use crate::loot::GroundItems;
use crate::matchmaking::{MatchManager, MatchRoom, RoomDeparture, SearchOutcome};
use crate::monster::{MonsterTable, SpawnPoint};
use crate::party::{LeaveOutcome, PartyManager};
use crate::persistence::PersistenceHandle;
use crate::trade::{self, TradeManager, TradeSession};
use crate::world::World;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{
    ChatChannel, ClientEvent, Direction, GuildRank, ItemStack, JobClass, MonsterId,
    ParticipantId, ServerEvent,
};

pub struct Simulation {
    world: World,
    monsters: MonsterTable,
    ground: GroundItems,
    trades: TradeManager,
    parties: PartyManager,
    guilds: GuildManager,
    lobby: MatchManager,
    persistence: PersistenceHandle,
    rng: StdRng,
}

fn online_ids(world: &World, guild: &Guild) -> Vec<ParticipantId> {
    guild
        .online_members()
        .filter_map(|m| world.find_by_name(&m.name))
        .collect()
}

fn character_of(world: &World, id: ParticipantId) -> GameResult<Character<'_>> {
    let participant = world.require(id)?;
    Ok(Character {
        id,
        name: &participant.name,
        job: participant.job,
        level: participant.level,
    })
}

impl Simulation {
    pub fn new(
        config: &ServerConfig,
        spawns: &[SpawnPoint],
        guilds: Vec<Guild>,
        persistence: PersistenceHandle,
    ) -> Self {
        let mut monsters = MonsterTable::new(config.seed);
        monsters.load_map(spawns);

        let mut guild_manager = GuildManager::new(config.invite_timeout_ms);
        guild_manager.load(guilds);

        Self {
            world: World::new(),
            monsters,
            ground: GroundItems::default(),
            trades: TradeManager::new(config.invite_timeout_ms),
            parties: PartyManager::new(config.invite_timeout_ms),
            guilds: guild_manager,
            lobby: MatchManager::new(),
            persistence,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn monsters(&self) -> &MonsterTable {
        &self.monsters
    }

    pub fn ground(&self) -> &GroundItems {
        &self.ground
    }

    pub fn trades(&self) -> &TradeManager {
        &self.trades
    }

    pub fn parties(&self) -> &PartyManager {
        &self.parties
    }

    pub fn guilds(&self) -> &GuildManager {
        &self.guilds
    }

    pub fn lobby(&self) -> &MatchManager {
        &self.lobby
    }

    /// Applies one client event. Failures become a targeted error event.
    pub fn handle_event(&mut self, id: ParticipantId, event: ClientEvent, out: &mut Outbox) {
        let name = event.name();
        if let Err(e) = self.dispatch(id, event, out) {
            debug!("Rejected {} from {}: {}", name, id, e);
            out.send(id, e.to_event());
        }
    }

    fn dispatch(&mut self, id: ParticipantId, event: ClientEvent, out: &mut Outbox) -> GameResult<()> {
        match event {
            ClientEvent::Ping { timestamp } => {
                out.send(id, ServerEvent::Pong { timestamp });
                return Ok(());
            }
            ClientEvent::Join { name, job, x, y } => return self.join(id, &name, job, x, y, out),
            _ => {}
        }

        if !self.world.contains(id) {
            return Err(GameError::not_joined());
        }

        match event {
            ClientEvent::Ping { .. } | ClientEvent::Join { .. } => Ok(()),
            ClientEvent::Leave => {
                self.disconnect(id, out);
                Ok(())
            }
            ClientEvent::Move {
                x,
                y,
                direction,
                is_moving,
            } => self.apply_movement(id, x, y, direction, is_moving, out),
            ClientEvent::Attack {
                direction,
                target_monster_ids,
            } => self.apply_attack_intent(id, direction, target_monster_ids, out),
            ClientEvent::MonsterDamage {
                monster_id, damage, ..
            } => {
                self.resolve_damage(id, monster_id, damage, out);
                Ok(())
            }
            ClientEvent::ChatSend {
                message,
                channel,
                target_id,
            } => self.chat(id, &message, channel, target_id, out),
            ClientEvent::Respawn { x, y } => self.respawn(id, x, y, out),
            ClientEvent::SyncRequest => {
                out.send(id, self.sync_state(id));
                Ok(())
            }

            ClientEvent::PartyCreate => self.party_create(id, out),
            ClientEvent::PartyInvite { target_id } => self.party_invite(id, target_id, out),
            ClientEvent::PartyInviteAccept { party_id } => self.party_accept(id, party_id, out),
            ClientEvent::PartyInviteDecline { party_id } => {
                let inviter = self.parties.decline(id, party_id)?;
                out.send(inviter, ServerEvent::PartyInviteDeclined { party_id, by_id: id });
                Ok(())
            }
            ClientEvent::PartyLeave => {
                let outcome = self.parties.leave(id)?;
                self.announce_party_departure(id, outcome, false, out);
                Ok(())
            }
            ClientEvent::PartyKick { target_id } => {
                let outcome = self.parties.kick(id, target_id)?;
                self.announce_party_departure(target_id, outcome, true, out);
                Ok(())
            }

            ClientEvent::GuildCreate { name, description } => {
                self.guild_create(id, &name, &description, out)
            }
            ClientEvent::GuildInvite {
                target_character_id,
            } => self.guild_invite(id, &target_character_id, out),
            ClientEvent::GuildInviteAccept { guild_id } => self.guild_accept(id, guild_id, out),
            ClientEvent::GuildInviteDecline { guild_id } => {
                let inviter = self.guilds.decline(id, guild_id)?;
                let by_name = self.world.require(id)?.name.clone();
                out.send(inviter, ServerEvent::GuildInviteDeclined { guild_id, by_name });
                Ok(())
            }
            ClientEvent::GuildKick { target_id } => self.guild_kick(id, &target_id, out),
            ClientEvent::GuildPromote { target_id, rank } => {
                self.guild_promote(id, &target_id, rank, out)
            }
            ClientEvent::GuildTransferLeader { target_id } => {
                self.guild_transfer(id, &target_id, out)
            }
            ClientEvent::GuildDisband => self.guild_disband(id, out),
            ClientEvent::GuildLeave => self.guild_leave(id, out),

            ClientEvent::TradeRequest { target_id } => self.trade_request(id, target_id, out),
            ClientEvent::TradeAccept { from_id } => self.trade_accept(id, from_id, out),
            ClientEvent::TradeDecline { from_id } => {
                self.trades.decline(id, from_id)?;
                out.send(from_id, ServerEvent::TradeRequestDeclined { by_id: id });
                Ok(())
            }
            ClientEvent::TradeUpdateOffer { items, gold } => {
                self.trade_update_offer(id, items, gold, out)
            }
            ClientEvent::TradeConfirm => self.trade_confirm(id, true, out),
            ClientEvent::TradeUnconfirm => self.trade_confirm(id, false, out),
            ClientEvent::TradeCancel => self.trade_cancel(id, out),

            ClientEvent::ItemPickup { item_id } => self.pick_up(id, item_id, out),

            ClientEvent::MatchCreate { name, max_players } => {
                let host_name = self.world.require(id)?.name.clone();
                let room = self.lobby.create(id, &host_name, &name, max_players)?;
                out.send(id, ServerEvent::MatchRoomUpdated { room: room.info() });
                Ok(())
            }
            ClientEvent::MatchJoin { room_id } => {
                let name = self.world.require(id)?.name.clone();
                let room = self.lobby.join(id, &name, room_id)?;
                announce_room(room, out);
                Ok(())
            }
            ClientEvent::MatchLeave => {
                let departure = self.lobby.leave(id)?;
                announce_room_departure(id, departure, out);
                Ok(())
            }
            ClientEvent::MatchReady { ready } => {
                let room = self.lobby.set_ready(id, ready)?;
                announce_room(room, out);
                Ok(())
            }
            ClientEvent::MatchStart => {
                let room = self.lobby.start(id)?;
                out.send_many(
                    room.member_ids(),
                    ServerEvent::MatchStarted { room: room.info() },
                );
                Ok(())
            }
            ClientEvent::MatchSearch => {
                let name = self.world.require(id)?.name.clone();
                match self.lobby.search(id, &name)? {
                    SearchOutcome::Queued(queued) => {
                        out.send(id, ServerEvent::MatchSearching { queued })
                    }
                    SearchOutcome::Found(room) => out.send_many(
                        room.member_ids(),
                        ServerEvent::MatchFound { room: room.info() },
                    ),
                }
                Ok(())
            }
            ClientEvent::MatchCancelSearch => {
                self.lobby.cancel_search(id)?;
                out.send(id, ServerEvent::MatchSearchCancelled);
                Ok(())
            }
        }
    }

    pub fn sync_state(&self, id: ParticipantId) -> ServerEvent {
        ServerEvent::SyncState {
            self_id: id,
            players: self.world.snapshot(),
            monsters: self.monsters.snapshots(),
            items: self.ground.snapshot(),
        }
    }

    fn join(
        &mut self,
        id: ParticipantId,
        name: &str,
        job: JobClass,
        x: f32,
        y: f32,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let player = self.world.join(id, name, job, x, y)?.snapshot();
        out.send(id, self.sync_state(id));
        out.broadcast_except(id, ServerEvent::PlayerJoined { player: player.clone() });

        if let Some(guild) = self.guilds.set_online(&player.name, true, player.level) {
            let guild_id = guild.id;
            let info = guild.info();
            let others: Vec<ParticipantId> = guild
                .online_members()
                .filter(|m| m.name != player.name)
                .filter_map(|m| self.world.find_by_name(&m.name))
                .collect();
            out.send(id, ServerEvent::GuildInfo { guild: info });
            out.send_many(
                others,
                ServerEvent::GuildMemberOnline {
                    guild_id,
                    name: player.name.clone(),
                    online: true,
                },
            );
        }
        Ok(())
    }

    fn apply_movement(
        &mut self,
        id: ParticipantId,
        x: f32,
        y: f32,
        direction: Direction,
        is_moving: bool,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let (x, y) = self.world.apply_movement(id, x, y, direction, is_moving)?;
        out.broadcast_except(
            id,
            ServerEvent::PlayerMoved {
                player_id: id,
                x,
                y,
                direction,
                is_moving,
            },
        );
        Ok(())
    }

    fn apply_attack_intent(
        &mut self,
        id: ParticipantId,
        direction: Direction,
        target_monster_ids: Vec<MonsterId>,
        out: &mut Outbox,
    ) -> GameResult<()> {
        self.world.begin_attack(id, direction)?;
        out.broadcast_except(
            id,
            ServerEvent::PlayerAttacked {
                player_id: id,
                direction,
                target_monster_ids,
            },
        );
        Ok(())
    }

    /// Hits on unknown or dead monsters are dropped without a reply.
    fn resolve_damage(
        &mut self,
        id: ParticipantId,
        monster_id: MonsterId,
        raw_damage: i32,
        out: &mut Outbox,
    ) {
        let outcome = match combat::resolve_damage(&mut self.monsters, monster_id, raw_damage, id) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Ignoring hit from {} on {}: {}", id, monster_id, e);
                return;
            }
        };
        combat::announce(&outcome, id, out);
        if !outcome.killed {
            return;
        }

        self.award_exp(id, outcome.exp, out);
        if let Some(monster) = self.monsters.get(monster_id) {
            let (kind, x, y) = (monster.kind, monster.x, monster.y);
            for item in self.ground.roll_drops(kind, x, y, &mut self.rng) {
                out.broadcast(ServerEvent::ItemDropped { item });
            }
        }
    }

    fn award_exp(&mut self, id: ParticipantId, amount: u32, out: &mut Outbox) {
        let Some(grant) = self.world.grant_exp(id, amount) else {
            return;
        };
        out.send(
            id,
            ServerEvent::ExpGained {
                amount,
                total: grant.total,
                level: grant.level,
            },
        );
        if grant.leveled_up {
            out.broadcast(ServerEvent::PlayerLevelUp {
                player_id: id,
                level: grant.level,
                max_hp: grant.max_hp,
            });
            if let Some(name) = self.world.get(id).map(|p| p.name.clone()) {
                self.guilds.set_online(&name, true, grant.level);
            }
            self.party_member_updated(id, out);
        }
    }

    fn respawn(&mut self, id: ParticipantId, x: f32, y: f32, out: &mut Outbox) -> GameResult<()> {
        let player = self.world.respawn(id, x, y)?;
        out.broadcast(ServerEvent::PlayerRespawned {
            player_id: id,
            x: player.x,
            y: player.y,
            hp: player.hp,
        });
        self.party_member_updated(id, out);
        Ok(())
    }

    fn chat(
        &mut self,
        id: ParticipantId,
        message: &str,
        channel: ChatChannel,
        target_id: Option<ParticipantId>,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let message = chat::sanitize(message)?;
        let target = chat::recipients(id, channel, target_id, &self.world, &self.parties, &self.guilds)?;
        let from_name = self.world.require(id)?.name.clone();
        out.push(
            target,
            ServerEvent::ChatMessage {
                from_id: id,
                from_name,
                channel,
                message,
            },
        );
        Ok(())
    }

    fn pick_up(&mut self, id: ParticipantId, item_id: u32, out: &mut Outbox) -> GameResult<()> {
        let player = self.world.get_mut(id).ok_or_else(GameError::not_joined)?;
        self.ground
            .pick_up(item_id, player.x, player.y, &mut player.inventory)?;
        let inventory = player.inventory.clone();
        out.broadcast(ServerEvent::ItemPickedUp {
            item_id,
            player_id: id,
        });
        out.send(id, ServerEvent::InventoryUpdated { inventory });
        Ok(())
    }

    // Party

    fn party_info(&self, party_id: u32) -> Option<shared::PartyInfo> {
        let party = self.parties.get(party_id)?;
        Some(party.info(|member| self.world.get(member).map(|p| p.party_member())))
    }

    fn party_member_updated(&self, id: ParticipantId, out: &mut Outbox) {
        let (Some(party), Some(player)) = (self.parties.party_of(id), self.world.get(id)) else {
            return;
        };
        out.send_many(
            party.members.clone(),
            ServerEvent::PartyMemberUpdated {
                party_id: party.id,
                member: player.party_member(),
            },
        );
    }

    fn party_create(&mut self, id: ParticipantId, out: &mut Outbox) -> GameResult<()> {
        let party_id = self.parties.create(id)?.id;
        if let Some(party) = self.party_info(party_id) {
            out.send(id, ServerEvent::PartyCreated { party });
        }
        Ok(())
    }

    fn party_invite(
        &mut self,
        id: ParticipantId,
        target_id: ParticipantId,
        out: &mut Outbox,
    ) -> GameResult<()> {
        if !self.world.contains(target_id) {
            return Err(GameError::unknown_target(format!("{} is not online", target_id)));
        }
        let party_id = self.parties.invite(id, target_id)?;
        let from_name = self.world.require(id)?.name.clone();
        out.send(
            target_id,
            ServerEvent::PartyInvited {
                party_id,
                from_id: id,
                from_name,
            },
        );
        Ok(())
    }

    fn party_accept(&mut self, id: ParticipantId, party_id: u32, out: &mut Outbox) -> GameResult<()> {
        let Some(party) = self.parties.accept(id, party_id)? else {
            debug!("Party {} could not take {} any more", party_id, id);
            return Ok(());
        };
        let others: Vec<ParticipantId> =
            party.members.iter().copied().filter(|m| *m != id).collect();

        if let Some(info) = self.party_info(party_id) {
            out.send(id, ServerEvent::PartyJoined { party: info });
        }
        if let Some(member) = self.world.get(id).map(|p| p.party_member()) {
            out.send_many(others, ServerEvent::PartyMemberJoined { party_id, member });
        }
        Ok(())
    }

    fn announce_party_departure(
        &self,
        member_id: ParticipantId,
        outcome: LeaveOutcome,
        kicked: bool,
        out: &mut Outbox,
    ) {
        match outcome {
            LeaveOutcome::Left {
                party_id,
                new_leader,
                remaining,
            } => {
                let mut notified = remaining.clone();
                notified.push(member_id);
                out.send_many(
                    notified,
                    ServerEvent::PartyMemberLeft {
                        party_id,
                        member_id,
                        kicked,
                    },
                );
                if let Some(leader_id) = new_leader {
                    info!("Party {} leadership passed to {}", party_id, leader_id);
                    out.send_many(
                        remaining,
                        ServerEvent::PartyLeaderChanged {
                            party_id,
                            leader_id,
                        },
                    );
                }
            }
            LeaveOutcome::Disbanded {
                party_id,
                former,
                withdrawn,
            } => {
                out.send_many(former, ServerEvent::PartyDisbanded { party_id });
                self.withdraw_party_invites(withdrawn, out);
            }
        }
    }

    /// Invites the server dropped early are reported like expired ones.
    fn withdraw_party_invites(&self, invites: Vec<PendingInvite<u32>>, out: &mut Outbox) {
        for invite in invites {
            out.send_many(
                vec![invite.from, invite.to],
                ServerEvent::PartyInviteExpired {
                    party_id: invite.target,
                    target_id: invite.to,
                },
            );
        }
    }

    fn withdraw_guild_invites(&self, invites: Vec<PendingInvite<u32>>, out: &mut Outbox) {
        for invite in invites {
            let target_name = self
                .world
                .get(invite.to)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            out.send_many(
                vec![invite.from, invite.to],
                ServerEvent::GuildInviteExpired {
                    guild_id: invite.target,
                    target_name,
                },
            );
        }
    }

    // Guild

    fn guild_create(
        &mut self,
        id: ParticipantId,
        name: &str,
        description: &str,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let founder = character_of(&self.world, id)?;
        let guild = self.guilds.create(&founder, name, description)?;
        self.persistence.save(guild);
        out.send(id, ServerEvent::GuildCreated { guild: guild.info() });
        Ok(())
    }

    fn guild_invite(&mut self, id: ParticipantId, target: &str, out: &mut Outbox) -> GameResult<()> {
        let target_id = self
            .world
            .find_by_name(target)
            .ok_or_else(|| GameError::unknown_target(format!("{} is not online", target)))?;
        if target_id == id {
            return Err(GameError::invalid_state("cannot invite yourself"));
        }
        let from = character_of(&self.world, id)?;
        let target_name = self.world.require(target_id)?.name.as_str();
        let guild_id = self.guilds.invite(&from, target_id, target_name)?;
        let guild_name = self
            .guilds
            .get(guild_id)
            .map(|g| g.name.clone())
            .unwrap_or_default();
        out.send(
            target_id,
            ServerEvent::GuildInvited {
                guild_id,
                guild_name,
                from_name: from.name.to_string(),
            },
        );
        Ok(())
    }

    fn guild_accept(&mut self, id: ParticipantId, guild_id: u32, out: &mut Outbox) -> GameResult<()> {
        let joiner = character_of(&self.world, id)?;
        let guild = self.guilds.accept(&joiner, guild_id)?;
        self.persistence.save(guild);

        let member = guild.member(joiner.name).cloned();
        let info = guild.info();
        let others: Vec<ParticipantId> = online_ids(&self.world, guild)
            .into_iter()
            .filter(|other| *other != id)
            .collect();

        out.send(id, ServerEvent::GuildInfo { guild: info });
        if let Some(member) = member {
            out.send_many(others, ServerEvent::GuildMemberJoined { guild_id, member });
        }
        Ok(())
    }

    fn guild_kick(&mut self, id: ParticipantId, target: &str, out: &mut Outbox) -> GameResult<()> {
        let caller = self.world.require(id)?.name.clone();
        let guild_id = self.guilds.kick(&caller, target)?;
        let mut notified = Vec::new();
        if let Some(guild) = self.guilds.get(guild_id) {
            self.persistence.save(guild);
            notified = online_ids(&self.world, guild);
        }
        notified.extend(self.world.find_by_name(target));
        out.send_many(
            notified,
            ServerEvent::GuildMemberLeft {
                guild_id,
                name: target.to_string(),
                kicked: true,
            },
        );
        Ok(())
    }

    fn guild_promote(
        &mut self,
        id: ParticipantId,
        target: &str,
        rank: GuildRank,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let caller = self.world.require(id)?.name.clone();
        let guild_id = self.guilds.promote(&caller, target, rank)?;
        self.announce_ranks(guild_id, &[target], out);
        Ok(())
    }

    fn guild_transfer(&mut self, id: ParticipantId, target: &str, out: &mut Outbox) -> GameResult<()> {
        let caller = self.world.require(id)?.name.clone();
        let guild_id = self.guilds.transfer_leader(&caller, target)?;
        self.announce_ranks(guild_id, &[target, caller.as_str()], out);
        Ok(())
    }

    fn announce_ranks(&self, guild_id: u32, names: &[&str], out: &mut Outbox) {
        let Some(guild) = self.guilds.get(guild_id) else {
            return;
        };
        self.persistence.save(guild);
        let online = online_ids(&self.world, guild);
        for name in names {
            if let Some(rank) = guild.rank_of(name) {
                out.send_many(
                    online.clone(),
                    ServerEvent::GuildRankChanged {
                        guild_id,
                        name: name.to_string(),
                        rank,
                    },
                );
            }
        }
    }

    fn guild_disband(&mut self, id: ParticipantId, out: &mut Outbox) -> GameResult<()> {
        let caller = self.world.require(id)?.name.clone();
        let (guild, withdrawn) = self.guilds.disband(&caller)?;
        self.persistence.delete(guild.id);
        out.send_many(
            online_ids(&self.world, &guild),
            ServerEvent::GuildDisbanded { guild_id: guild.id },
        );
        self.withdraw_guild_invites(withdrawn, out);
        Ok(())
    }

    fn guild_leave(&mut self, id: ParticipantId, out: &mut Outbox) -> GameResult<()> {
        let caller = self.world.require(id)?.name.clone();
        let guild_id = self.guilds.leave(&caller)?;
        let mut notified = vec![id];
        if let Some(guild) = self.guilds.get(guild_id) {
            self.persistence.save(guild);
            notified.extend(online_ids(&self.world, guild));
        }
        out.send_many(
            notified,
            ServerEvent::GuildMemberLeft {
                guild_id,
                name: caller,
                kicked: false,
            },
        );
        Ok(())
    }

    // Trade

    fn trade_request(
        &mut self,
        id: ParticipantId,
        target_id: ParticipantId,
        out: &mut Outbox,
    ) -> GameResult<()> {
        if !self.world.contains(target_id) {
            return Err(GameError::unknown_target(format!("{} is not online", target_id)));
        }
        self.trades.request(id, target_id)?;
        let from_name = self.world.require(id)?.name.clone();
        out.send(target_id, ServerEvent::TradeRequested { from_id: id, from_name });
        Ok(())
    }

    fn trade_accept(&mut self, id: ParticipantId, from_id: ParticipantId, out: &mut Outbox) -> GameResult<()> {
        let from_name = self
            .world
            .get(from_id)
            .map(|p| p.name.clone())
            .ok_or_else(|| GameError::unknown_target(format!("{} is not online", from_id)))?;
        let own_name = self.world.require(id)?.name.clone();
        self.trades.accept(id, from_id)?;

        out.send(
            id,
            ServerEvent::TradeStarted {
                partner_id: from_id,
                partner_name: from_name,
            },
        );
        out.send(
            from_id,
            ServerEvent::TradeStarted {
                partner_id: id,
                partner_name: own_name,
            },
        );
        Ok(())
    }

    fn trade_update_offer(
        &mut self,
        id: ParticipantId,
        items: Vec<ItemStack>,
        gold: u64,
        out: &mut Outbox,
    ) -> GameResult<()> {
        let inventory = self.world.inventory(id).ok_or_else(GameError::not_joined)?;
        let (partner, offer) = self.trades.update_offer(id, items, gold, inventory)?;
        out.send_many(
            vec![id, partner],
            ServerEvent::TradeOfferUpdated {
                player_id: id,
                offer,
            },
        );
        Ok(())
    }

    fn trade_confirm(&mut self, id: ParticipantId, confirmed: bool, out: &mut Outbox) -> GameResult<()> {
        let (partner, ready) = self.trades.set_confirmed(id, confirmed)?;
        out.send_many(
            vec![id, partner],
            ServerEvent::TradeConfirmChanged {
                player_id: id,
                confirmed,
            },
        );
        if let Some(session) = ready {
            self.settle_trade(session, out);
        }
        Ok(())
    }

    fn settle_trade(&mut self, mut session: TradeSession, out: &mut Outbox) {
        let both = vec![session.a, session.b];
        let (Some(inventory_a), Some(inventory_b)) = (
            self.world.inventory(session.a).cloned(),
            self.world.inventory(session.b).cloned(),
        ) else {
            out.send_many(
                both,
                ServerEvent::TradeCancelled {
                    reason: "partner is gone".to_string(),
                },
            );
            return;
        };

        match trade::settle(&mut session, &inventory_a, &inventory_b) {
            Ok(settlement) => {
                info!("Trade {} settled between {} and {}", session.id, session.a, session.b);
                let deliveries = [
                    (session.a, settlement.inventory_a, &session.offer_b),
                    (session.b, settlement.inventory_b, &session.offer_a),
                ];
                for (participant, inventory, received) in deliveries {
                    if let Some(slot) = self.world.inventory_mut(participant) {
                        *slot = inventory.clone();
                    }
                    out.send(
                        participant,
                        ServerEvent::TradeCompleted {
                            received_items: received.items.clone(),
                            received_gold: received.gold,
                        },
                    );
                    out.send(participant, ServerEvent::InventoryUpdated { inventory });
                }
            }
            Err(reason) => {
                info!("Trade {} aborted: {}", session.id, reason);
                out.send_many(both, ServerEvent::TradeCancelled { reason });
            }
        }
    }

    fn trade_cancel(&mut self, id: ParticipantId, out: &mut Outbox) -> GameResult<()> {
        let session = self.trades.cancel(id)?;
        let name = self.world.require(id)?.name.clone();
        out.send_many(
            vec![session.a, session.b],
            ServerEvent::TradeCancelled {
                reason: format!("{} cancelled the trade", name),
            },
        );
        Ok(())
    }

    /// Cascading cleanup when a connection goes away.
    pub fn disconnect(&mut self, id: ParticipantId, out: &mut Outbox) {
        let Some((name, level)) = self.world.get(id).map(|p| (p.name.clone(), p.level)) else {
            return;
        };

        let (cancelled, requests) = self.trades.on_disconnect(id);
        if let Some(partner) = cancelled.and_then(|session| session.partner_of(id)) {
            out.send(
                partner,
                ServerEvent::TradeCancelled {
                    reason: format!("{} disconnected", name),
                },
            );
        }
        for request in requests {
            let other = if request.from == id { request.to } else { request.from };
            out.send(other, ServerEvent::TradeRequestExpired { other_id: id });
        }

        let (departure, invites) = self.parties.on_disconnect(id);
        if let Some(outcome) = departure {
            self.announce_party_departure(id, outcome, false, out);
        }
        self.withdraw_party_invites(invites, out);

        let invites = self.guilds.on_disconnect(id);
        self.withdraw_guild_invites(invites, out);
        if let Some(guild) = self.guilds.set_online(&name, false, level) {
            let guild_id = guild.id;
            out.send_many(
                online_ids(&self.world, guild),
                ServerEvent::GuildMemberOnline {
                    guild_id,
                    name: name.clone(),
                    online: false,
                },
            );
        }

        if let Some(departure) = self.lobby.on_disconnect(id) {
            announce_room_departure(id, departure, out);
        }

        self.monsters.forget_target(id);
        self.world.leave(id);
        out.broadcast(ServerEvent::PlayerLeft { player_id: id });
    }

    /// Advances every timer by `dt_ms` and emits what changed.
    pub fn tick(&mut self, dt_ms: u64, out: &mut Outbox) {
        self.world.advance_timers(dt_ms);

        let targets = self.world.targetable_positions();
        let report = self.monsters.tick(dt_ms, &targets);
        for attack in &report.attacks {
            let Some(hp) = self.world.damage(attack.target_id, attack.damage) else {
                continue;
            };
            out.broadcast(ServerEvent::PlayerDamaged {
                player_id: attack.target_id,
                monster_id: attack.monster_id,
                damage: attack.damage,
                hp,
            });
            self.party_member_updated(attack.target_id, out);
        }
        if !report.changed.is_empty() {
            out.broadcast(ServerEvent::MonsterUpdate {
                monsters: report.changed,
            });
        }

        for item_id in self.ground.tick(dt_ms) {
            out.broadcast(ServerEvent::ItemExpired { item_id });
        }

        for request in self.trades.tick(dt_ms) {
            out.send(request.from, ServerEvent::TradeRequestExpired { other_id: request.to });
            out.send(request.to, ServerEvent::TradeRequestExpired { other_id: request.from });
        }
        let expired = self.parties.tick(dt_ms);
        self.withdraw_party_invites(expired, out);
        let expired = self.guilds.tick(dt_ms);
        self.withdraw_guild_invites(expired, out);
    }
}

fn announce_room(room: &MatchRoom, out: &mut Outbox) {
    out.send_many(
        room.member_ids(),
        ServerEvent::MatchRoomUpdated { room: room.info() },
    );
}

fn announce_room_departure(id: ParticipantId, departure: RoomDeparture, out: &mut Outbox) {
    out.send(
        id,
        ServerEvent::MatchLeft {
            room_id: departure.room_id,
        },
    );
    if let Some(room) = departure.room {
        announce_room(&room, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{spawn_writer, GuildStore, MemoryGuildStore};
    use shared::{ErrorCode, MonsterKind, MonsterState};

    fn simulation(spawns: &[SpawnPoint]) -> Simulation {
        Simulation::new(
            &ServerConfig::default(),
            spawns,
            Vec::new(),
            PersistenceHandle::disabled(),
        )
    }

    fn join(sim: &mut Simulation, id: ParticipantId, name: &str, x: f32, y: f32) -> Outbox {
        let mut out = Outbox::new();
        sim.handle_event(
            id,
            ClientEvent::Join {
                name: name.to_string(),
                job: JobClass::Warrior,
                x,
                y,
            },
            &mut out,
        );
        out
    }

    fn send(sim: &mut Simulation, id: ParticipantId, event: ClientEvent) -> Outbox {
        let mut out = Outbox::new();
        sim.handle_event(id, event, &mut out);
        out
    }

    fn error_code(out: &Outbox, id: ParticipantId) -> Option<ErrorCode> {
        out.events_for(id).into_iter().find_map(|event| match event {
            ServerEvent::Error { code, .. } => Some(*code),
            _ => None,
        })
    }

    #[test]
    fn test_join_sends_snapshot_and_announces() {
        let mut sim = simulation(&[SpawnPoint {
            kind: MonsterKind::Slime,
            x: 100.0,
            y: 100.0,
        }]);
        join(&mut sim, 1, "ann", 10.0, 10.0);
        let out = join(&mut sim, 2, "bob", 20.0, 20.0);

        match out.events_for(2)[0] {
            ServerEvent::SyncState {
                self_id,
                players,
                monsters,
                ..
            } => {
                assert_eq!(*self_id, 2);
                assert_eq!(players.len(), 2);
                assert_eq!(monsters.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        let to_ann = out.events_for(1);
        assert_eq!(to_ann.len(), 1);
        assert_eq!(to_ann[0].name(), "player:joined");
    }

    #[test]
    fn test_events_before_join_are_rejected() {
        let mut sim = simulation(&[]);
        let out = send(&mut sim, 5, ClientEvent::PartyCreate);
        assert_eq!(error_code(&out, 5), Some(ErrorCode::NotJoined));

        let out = send(&mut sim, 5, ClientEvent::Ping { timestamp: 9 });
        assert_eq!(out.events_for(5), vec![&ServerEvent::Pong { timestamp: 9 }]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        let out = join(&mut sim, 2, "ANN", 0.0, 0.0);
        assert_eq!(error_code(&out, 2), Some(ErrorCode::NameTaken));
        assert!(!sim.world().contains(2));
    }

    #[test]
    fn test_movement_is_not_echoed() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        join(&mut sim, 2, "bob", 0.0, 0.0);

        let out = send(
            &mut sim,
            1,
            ClientEvent::Move {
                x: 50.0,
                y: 60.0,
                direction: Direction::Right,
                is_moving: true,
            },
        );
        assert!(out.events_for(1).is_empty());
        assert_eq!(out.events_for(2)[0].name(), "player:moved");
        assert_eq!(sim.world().get(1).map(|p| (p.x, p.y)), Some((50.0, 60.0)));
    }

    #[test]
    fn test_attack_flag_clears_after_visual_delay() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        send(
            &mut sim,
            1,
            ClientEvent::Attack {
                direction: Direction::Up,
                target_monster_ids: vec![],
            },
        );
        assert!(sim.world().get(1).unwrap().is_attacking);

        let mut out = Outbox::new();
        sim.tick(200, &mut out);
        assert!(sim.world().get(1).unwrap().is_attacking);
        sim.tick(100, &mut out);
        assert!(!sim.world().get(1).unwrap().is_attacking);
    }

    #[test]
    fn test_kill_awards_exp_and_drops_loot() {
        let mut sim = simulation(&[SpawnPoint {
            kind: MonsterKind::Slime,
            x: 100.0,
            y: 100.0,
        }]);
        join(&mut sim, 1, "ann", 100.0, 120.0);

        let out = send(
            &mut sim,
            1,
            ClientEvent::MonsterDamage {
                monster_id: 1,
                damage: 500,
                new_hp: 0,
                killed: true,
                exp: 25,
            },
        );
        let names: Vec<&str> = out.events_for(1).iter().map(|e| e.name()).collect();
        assert!(names.contains(&"monster:killed"));
        assert!(names.contains(&"player:exp"));
        assert!(names.contains(&"item:dropped"));
        assert_eq!(sim.world().get(1).unwrap().exp, 25);
        assert!(!sim.ground().is_empty());

        // A second hit on the corpse is dropped without a reply.
        let out = send(
            &mut sim,
            1,
            ClientEvent::MonsterDamage {
                monster_id: 1,
                damage: 10,
                new_hp: 0,
                killed: false,
                exp: 0,
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_monster_attack_damages_participant() {
        let mut sim = simulation(&[SpawnPoint {
            kind: MonsterKind::Slime,
            x: 100.0,
            y: 100.0,
        }]);
        join(&mut sim, 1, "ann", 120.0, 100.0);

        let mut out = Outbox::new();
        sim.tick(100, &mut out);
        sim.tick(100, &mut out);
        assert_eq!(sim.monsters().get(1).unwrap().state, MonsterState::Attack);
        sim.tick(100, &mut out);

        let damaged = out
            .events_for(1)
            .into_iter()
            .filter(|e| e.name() == "player:damaged")
            .count();
        assert_eq!(damaged, 1);
        assert_eq!(sim.world().get(1).unwrap().hp, 145);
        assert!(out.events_for(1).iter().any(|e| e.name() == "monster:update"));
    }

    #[test]
    fn test_idle_tick_sends_no_monster_update() {
        let mut sim = simulation(&[SpawnPoint {
            kind: MonsterKind::Orc,
            x: 1000.0,
            y: 1000.0,
        }]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        let mut out = Outbox::new();
        sim.tick(100, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_party_leader_disconnect_hands_over() {
        let mut sim = simulation(&[]);
        for (id, name) in [(1, "p1"), (2, "p2"), (3, "p3")] {
            join(&mut sim, id, name, 0.0, 0.0);
        }
        send(&mut sim, 1, ClientEvent::PartyCreate);
        for id in [2, 3] {
            send(&mut sim, 1, ClientEvent::PartyInvite { target_id: id });
            send(&mut sim, id, ClientEvent::PartyInviteAccept { party_id: 1 });
        }

        let mut out = Outbox::new();
        sim.disconnect(1, &mut out);

        let changed = ServerEvent::PartyLeaderChanged {
            party_id: 1,
            leader_id: 2,
        };
        assert!(out.events_for(2).contains(&&changed));
        assert!(out.events_for(3).contains(&&changed));
        let party = sim.parties().party_of(2).unwrap();
        assert_eq!(party.leader, 2);
        assert_eq!(party.members.len(), 2);
    }

    #[test]
    fn test_trade_disconnect_cancels_for_partner() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        join(&mut sim, 2, "bob", 0.0, 0.0);
        send(&mut sim, 1, ClientEvent::TradeRequest { target_id: 2 });
        send(&mut sim, 2, ClientEvent::TradeAccept { from_id: 1 });

        let mut out = Outbox::new();
        sim.disconnect(2, &mut out);
        assert!(out
            .events_for(1)
            .iter()
            .any(|e| e.name() == "trade:cancelled"));
        assert!(!sim.trades().is_trading(1));
    }

    #[test]
    fn test_trade_request_expires() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        join(&mut sim, 2, "bob", 0.0, 0.0);
        send(&mut sim, 1, ClientEvent::TradeRequest { target_id: 2 });

        let mut out = Outbox::new();
        sim.tick(30_000, &mut out);
        assert!(out
            .events_for(1)
            .contains(&&ServerEvent::TradeRequestExpired { other_id: 2 }));
        let out = send(&mut sim, 2, ClientEvent::TradeAccept { from_id: 1 });
        assert_eq!(error_code(&out, 2), Some(ErrorCode::UnknownTarget));
    }

    fn open_trade(sim: &mut Simulation) {
        join(sim, 1, "ann", 0.0, 0.0);
        join(sim, 2, "bob", 0.0, 0.0);
        send(sim, 1, ClientEvent::TradeRequest { target_id: 2 });
        send(sim, 2, ClientEvent::TradeAccept { from_id: 1 });
    }

    fn form_party(sim: &mut Simulation, leader: ParticipantId, member: ParticipantId) {
        send(sim, leader, ClientEvent::PartyCreate);
        send(sim, leader, ClientEvent::PartyInvite { target_id: member });
        send(sim, member, ClientEvent::PartyInviteAccept { party_id: 1 });
    }

    fn updated_member(out: &Outbox, to: ParticipantId, about: ParticipantId) -> Option<shared::PartyMember> {
        out.events_for(to).into_iter().find_map(|event| match event {
            ServerEvent::PartyMemberUpdated { member, .. } if member.id == about => {
                Some(member.clone())
            }
            _ => None,
        })
    }

    #[test]
    fn test_overflowing_offer_is_rejected() {
        let mut sim = simulation(&[]);
        open_trade(&mut sim);

        let out = send(
            &mut sim,
            1,
            ClientEvent::TradeUpdateOffer {
                items: vec![ItemStack::new("potion", u32::MAX), ItemStack::new("potion", 1)],
                gold: 0,
            },
        );
        assert_eq!(error_code(&out, 1), Some(ErrorCode::InsufficientItems));
        assert!(out.events_for(2).is_empty());
        assert!(sim.trades().session_of(1).unwrap().offer_a.items.is_empty());
    }

    #[test]
    fn test_failed_settlement_cancels_for_both() {
        let mut sim = simulation(&[]);
        open_trade(&mut sim);
        sim.world
            .inventory_mut(1)
            .unwrap()
            .add(&ItemStack::new("sword", 1));
        let mut cramped = shared::Inventory::with_capacity(1);
        cramped.add(&ItemStack::new("rope", 1));
        *sim.world.inventory_mut(2).unwrap() = cramped.clone();

        send(
            &mut sim,
            1,
            ClientEvent::TradeUpdateOffer {
                items: vec![ItemStack::new("sword", 1)],
                gold: 0,
            },
        );
        send(&mut sim, 1, ClientEvent::TradeConfirm);
        let out = send(&mut sim, 2, ClientEvent::TradeConfirm);

        let cancelled = ServerEvent::TradeCancelled {
            reason: "inventory is full".to_string(),
        };
        assert!(out.events_for(1).contains(&&cancelled));
        assert!(out.events_for(2).contains(&&cancelled));
        assert!(!out
            .events_for(1)
            .iter()
            .any(|e| e.name() == "trade:completed"));

        assert_eq!(sim.world().inventory(1).unwrap().quantity_of("sword"), 1);
        assert_eq!(sim.world().inventory(2).unwrap(), &cramped);
        assert!(!sim.trades().is_trading(1));
        assert!(!sim.trades().is_trading(2));
    }

    #[test]
    fn test_party_sees_member_damage_and_level() {
        let mut sim = simulation(&[SpawnPoint {
            kind: MonsterKind::Slime,
            x: 100.0,
            y: 100.0,
        }]);
        join(&mut sim, 1, "ann", 120.0, 100.0);
        join(&mut sim, 2, "bob", 1900.0, 1900.0);
        form_party(&mut sim, 1, 2);

        let mut out = Outbox::new();
        for _ in 0..3 {
            sim.tick(100, &mut out);
        }
        let hurt = updated_member(&out, 2, 1).unwrap();
        assert_eq!(hurt.hp, 145);
        assert!(updated_member(&out, 1, 1).is_some());

        let mut out = Outbox::new();
        sim.award_exp(2, 100, &mut out);
        let promoted = updated_member(&out, 1, 2).unwrap();
        assert_eq!(promoted.level, 2);
        assert_eq!(promoted.hp, promoted.max_hp);
    }

    #[test]
    fn test_guild_disband_reaches_online_members() {
        let mut sim = simulation(&[]);
        for (id, name) in [(1, "lea"), (2, "bo"), (3, "cy"), (4, "dee")] {
            join(&mut sim, id, name, 0.0, 0.0);
        }
        send(
            &mut sim,
            1,
            ClientEvent::GuildCreate {
                name: "Wardens".to_string(),
                description: String::new(),
            },
        );
        for (id, name) in [(2, "bo"), (3, "cy")] {
            send(
                &mut sim,
                1,
                ClientEvent::GuildInvite {
                    target_character_id: name.to_string(),
                },
            );
            send(&mut sim, id, ClientEvent::GuildInviteAccept { guild_id: 1 });
        }
        sim.disconnect(3, &mut Outbox::new());
        send(
            &mut sim,
            1,
            ClientEvent::GuildInvite {
                target_character_id: "dee".to_string(),
            },
        );

        let out = send(&mut sim, 1, ClientEvent::GuildDisband);
        let disbanded = ServerEvent::GuildDisbanded { guild_id: 1 };
        assert!(out.events_for(1).contains(&&disbanded));
        assert!(out.events_for(2).contains(&&disbanded));
        assert!(out.events_for(3).is_empty());
        assert_eq!(
            out.events_for(4),
            vec![&ServerEvent::GuildInviteExpired {
                guild_id: 1,
                target_name: "dee".to_string(),
            }]
        );
        assert!(sim.guilds().guild_of("bo").is_none());
    }

    #[test]
    fn test_disconnect_withdraws_pending_requests() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        join(&mut sim, 2, "bob", 0.0, 0.0);
        send(&mut sim, 1, ClientEvent::PartyCreate);
        send(&mut sim, 1, ClientEvent::PartyInvite { target_id: 2 });
        send(
            &mut sim,
            1,
            ClientEvent::GuildCreate {
                name: "Wardens".to_string(),
                description: String::new(),
            },
        );
        send(
            &mut sim,
            1,
            ClientEvent::GuildInvite {
                target_character_id: "bob".to_string(),
            },
        );
        send(&mut sim, 1, ClientEvent::TradeRequest { target_id: 2 });

        let mut out = Outbox::new();
        sim.disconnect(1, &mut out);
        let to_bob = out.events_for(2);
        assert!(to_bob.contains(&&ServerEvent::TradeRequestExpired { other_id: 1 }));
        assert!(to_bob.contains(&&ServerEvent::PartyInviteExpired {
            party_id: 1,
            target_id: 2,
        }));
        assert!(to_bob.contains(&&ServerEvent::GuildInviteExpired {
            guild_id: 1,
            target_name: "bob".to_string(),
        }));

        let out = send(&mut sim, 2, ClientEvent::PartyInviteAccept { party_id: 1 });
        assert_eq!(error_code(&out, 2), Some(ErrorCode::UnknownTarget));
    }

    #[test]
    fn test_guild_leader_cannot_leave() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "lea", 0.0, 0.0);
        send(
            &mut sim,
            1,
            ClientEvent::GuildCreate {
                name: "Wardens".to_string(),
                description: String::new(),
            },
        );
        let out = send(&mut sim, 1, ClientEvent::GuildLeave);
        assert_eq!(error_code(&out, 1), Some(ErrorCode::NotAuthorized));
        assert!(sim.guilds().guild_of("lea").is_some());
    }

    #[test]
    fn test_whisper_reaches_target_and_sender() {
        let mut sim = simulation(&[]);
        join(&mut sim, 1, "ann", 0.0, 0.0);
        join(&mut sim, 2, "bob", 0.0, 0.0);
        join(&mut sim, 3, "cat", 0.0, 0.0);

        let out = send(
            &mut sim,
            1,
            ClientEvent::ChatSend {
                message: " psst ".to_string(),
                channel: ChatChannel::Whisper,
                target_id: Some(2),
            },
        );
        assert_eq!(out.events_for(1).len(), 1);
        assert_eq!(out.events_for(2).len(), 1);
        assert!(out.events_for(3).is_empty());
    }

    #[tokio::test]
    async fn test_guild_changes_reach_the_store() {
        let store = MemoryGuildStore::new();
        let (handle, writer) = spawn_writer(store.clone());
        let mut sim = Simulation::new(&ServerConfig::default(), &[], Vec::new(), handle);

        join(&mut sim, 1, "lea", 0.0, 0.0);
        join(&mut sim, 2, "bo", 0.0, 0.0);
        send(
            &mut sim,
            1,
            ClientEvent::GuildCreate {
                name: "Wardens".to_string(),
                description: "north gate".to_string(),
            },
        );
        send(
            &mut sim,
            1,
            ClientEvent::GuildInvite {
                target_character_id: "bo".to_string(),
            },
        );
        send(&mut sim, 2, ClientEvent::GuildInviteAccept { guild_id: 1 });
        drop(sim);
        writer.await.unwrap();

        let saved = store.load_all().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].members.len(), 2);
    }

    #[test]
    fn test_reconnecting_member_gets_guild_info() {
        let mut first = simulation(&[]);
        join(&mut first, 1, "lea", 0.0, 0.0);
        send(
            &mut first,
            1,
            ClientEvent::GuildCreate {
                name: "Wardens".to_string(),
                description: String::new(),
            },
        );
        let guild = first.guilds().guild_of("lea").unwrap().clone();

        let mut sim = Simulation::new(
            &ServerConfig::default(),
            &[],
            vec![guild],
            PersistenceHandle::disabled(),
        );
        let out = join(&mut sim, 7, "lea", 0.0, 0.0);
        assert!(out.events_for(7).iter().any(|e| e.name() == "guild:info"));
        assert_eq!(
            sim.guilds()
                .guild_of("lea")
                .unwrap()
                .online_members()
                .count(),
            1
        );
    }
}
