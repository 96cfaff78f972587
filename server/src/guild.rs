//! Guild rosters and rank-based authorization.
//!
//! Members are keyed by character name so the roster survives reconnects
//! and restarts. Live invites still travel between connected participants.
//!
//! Authorization:
//! - leader: invite, kick officers and members, promote/demote, transfer
//!   leadership, disband
//! - officer: invite, kick members
//! - member: leave
//!
//! A leader cannot leave; they must transfer leadership or disband first.

use crate::error::{GameError, GameResult};
use crate::invite::{InviteQueue, PendingInvite};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{ErrorCode, GuildInfo, GuildMember, GuildRank, JobClass, ParticipantId};
use std::collections::{BTreeMap, HashMap};

pub const GUILD_NAME_MIN: usize = 3;
pub const GUILD_NAME_MAX: usize = 24;
const DESCRIPTION_MAX: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub members: Vec<GuildMember>,
}

impl Guild {
    pub fn leader(&self) -> Option<&GuildMember> {
        self.members.iter().find(|m| m.rank == GuildRank::Leader)
    }

    pub fn member(&self, name: &str) -> Option<&GuildMember> {
        self.members.iter().find(|m| m.name == name)
    }

    fn member_mut(&mut self, name: &str) -> Option<&mut GuildMember> {
        self.members.iter_mut().find(|m| m.name == name)
    }

    pub fn rank_of(&self, name: &str) -> Option<GuildRank> {
        self.member(name).map(|m| m.rank)
    }

    pub fn online_members(&self) -> impl Iterator<Item = &GuildMember> {
        self.members.iter().filter(|m| m.online)
    }

    pub fn info(&self) -> GuildInfo {
        GuildInfo {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            leader: self
                .leader()
                .map(|m| m.name.clone())
                .unwrap_or_default(),
            members: self.members.clone(),
        }
    }
}

/// Who is acting, as the guild roster sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct Character<'a> {
    pub id: ParticipantId,
    pub name: &'a str,
    pub job: JobClass,
    pub level: u32,
}

impl Character<'_> {
    fn as_member(&self, rank: GuildRank) -> GuildMember {
        GuildMember {
            name: self.name.to_string(),
            rank,
            job: self.job,
            level: self.level,
            online: true,
        }
    }
}

#[derive(Debug)]
pub struct GuildManager {
    guilds: BTreeMap<u32, Guild>,
    by_member: HashMap<String, u32>,
    invites: InviteQueue<u32>,
    next_id: u32,
}

impl GuildManager {
    pub fn new(invite_timeout_ms: u64) -> Self {
        Self {
            guilds: BTreeMap::new(),
            by_member: HashMap::new(),
            invites: InviteQueue::new(invite_timeout_ms),
            next_id: 1,
        }
    }

    /// Seeds the manager from durable storage. Everyone starts offline.
    pub fn load(&mut self, guilds: Vec<Guild>) {
        for mut guild in guilds {
            for member in &mut guild.members {
                member.online = false;
                self.by_member.insert(member.name.clone(), guild.id);
            }
            self.next_id = self.next_id.max(guild.id + 1);
            self.guilds.insert(guild.id, guild);
        }
        info!("Loaded {} guilds", self.guilds.len());
    }

    pub fn get(&self, guild_id: u32) -> Option<&Guild> {
        self.guilds.get(&guild_id)
    }

    pub fn guild_of(&self, name: &str) -> Option<&Guild> {
        self.by_member
            .get(name)
            .and_then(|guild_id| self.guilds.get(guild_id))
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    fn require_guild_mut(&mut self, name: &str) -> GameResult<&mut Guild> {
        let guild_id = *self
            .by_member
            .get(name)
            .ok_or_else(|| GameError::invalid_state("not in a guild"))?;
        self.guilds
            .get_mut(&guild_id)
            .ok_or_else(|| GameError::invalid_state("not in a guild"))
    }

    pub fn create(
        &mut self,
        founder: &Character<'_>,
        name: &str,
        description: &str,
    ) -> GameResult<&Guild> {
        let name = name.trim();
        let length = name.chars().count();
        if !(GUILD_NAME_MIN..=GUILD_NAME_MAX).contains(&length) {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                format!(
                    "guild name must be {}-{} characters",
                    GUILD_NAME_MIN, GUILD_NAME_MAX
                ),
            ));
        }
        if self.by_member.contains_key(founder.name) {
            return Err(GameError::invalid_state("already in a guild"));
        }
        if self
            .guilds
            .values()
            .any(|g| g.name.eq_ignore_ascii_case(name))
        {
            return Err(GameError::protocol(
                ErrorCode::NameTaken,
                "guild name is taken",
            ));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.by_member.insert(founder.name.to_string(), id);
        info!("Guild {} '{}' founded by {}", id, name, founder.name);
        Ok(&*self.guilds.entry(id).or_insert(Guild {
            id,
            name: name.to_string(),
            description: description.trim().chars().take(DESCRIPTION_MAX).collect(),
            members: vec![founder.as_member(GuildRank::Leader)],
        }))
    }

    pub fn invite(
        &mut self,
        from: &Character<'_>,
        target_id: ParticipantId,
        target_name: &str,
    ) -> GameResult<u32> {
        let guild = self
            .guild_of(from.name)
            .ok_or_else(|| GameError::invalid_state("not in a guild"))?;
        if guild.rank_of(from.name) == Some(GuildRank::Member) {
            return Err(GameError::unauthorized(
                "only leaders and officers can invite",
            ));
        }
        if self.by_member.contains_key(target_name) {
            return Err(GameError::invalid_state("target is already in a guild"));
        }
        let guild_id = guild.id;
        self.invites.push(from.id, target_id, guild_id);
        Ok(guild_id)
    }

    pub fn accept(&mut self, joiner: &Character<'_>, guild_id: u32) -> GameResult<&Guild> {
        if self.invites.take(joiner.id, guild_id).is_none() {
            return Err(GameError::unknown_target(format!(
                "no invite to guild {}",
                guild_id
            )));
        }
        if self.by_member.contains_key(joiner.name) {
            return Err(GameError::invalid_state("already in a guild"));
        }
        let guild = self
            .guilds
            .get_mut(&guild_id)
            .ok_or_else(|| GameError::unknown_target("guild no longer exists"))?;
        guild.members.push(joiner.as_member(GuildRank::Member));
        self.by_member.insert(joiner.name.to_string(), guild_id);
        self.invites.remove_involving(joiner.id);
        debug!("{} joined guild {}", joiner.name, guild_id);
        Ok(&*guild)
    }

    /// Returns the inviter so they can be told.
    pub fn decline(&mut self, target_id: ParticipantId, guild_id: u32) -> GameResult<ParticipantId> {
        self.invites
            .take(target_id, guild_id)
            .map(|invite| invite.from)
            .ok_or_else(|| GameError::unknown_target(format!("no invite to guild {}", guild_id)))
    }

    /// Removes `target` from the caller's guild. Returns the guild id.
    pub fn kick(&mut self, caller: &str, target: &str) -> GameResult<u32> {
        let guild = self.require_guild_mut(caller)?;
        let caller_rank = guild.rank_of(caller);
        let target_rank = guild
            .rank_of(target)
            .ok_or_else(|| GameError::unknown_target(format!("{} is not in your guild", target)))?;

        let allowed = match (caller_rank, target_rank) {
            _ if caller == target => false,
            (Some(GuildRank::Leader), GuildRank::Officer | GuildRank::Member) => true,
            (Some(GuildRank::Officer), GuildRank::Member) => true,
            _ => false,
        };
        if !allowed {
            return Err(GameError::unauthorized(format!("cannot kick {}", target)));
        }

        guild.members.retain(|m| m.name != target);
        let guild_id = guild.id;
        self.by_member.remove(target);
        Ok(guild_id)
    }

    /// Toggles a non-leader between member and officer.
    pub fn promote(&mut self, caller: &str, target: &str, rank: GuildRank) -> GameResult<u32> {
        if rank == GuildRank::Leader {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "use guild:transfer_leader to hand over leadership",
            ));
        }
        let guild = self.require_guild_mut(caller)?;
        if guild.rank_of(caller) != Some(GuildRank::Leader) {
            return Err(GameError::unauthorized("only the guild leader can promote"));
        }
        let guild_id = guild.id;
        let member = guild
            .member_mut(target)
            .ok_or_else(|| GameError::unknown_target(format!("{} is not in your guild", target)))?;
        if member.rank == GuildRank::Leader {
            return Err(GameError::invalid_state("the leader's rank cannot change"));
        }
        member.rank = rank;
        Ok(guild_id)
    }

    pub fn transfer_leader(&mut self, caller: &str, target: &str) -> GameResult<u32> {
        let guild = self.require_guild_mut(caller)?;
        if guild.rank_of(caller) != Some(GuildRank::Leader) {
            return Err(GameError::unauthorized(
                "only the guild leader can transfer leadership",
            ));
        }
        if caller == target || guild.member(target).is_none() {
            return Err(GameError::unknown_target(format!(
                "{} is not another member of your guild",
                target
            )));
        }
        for member in &mut guild.members {
            if member.name == target {
                member.rank = GuildRank::Leader;
            } else if member.name == caller {
                member.rank = GuildRank::Officer;
            }
        }
        Ok(guild.id)
    }

    /// Leader only. Returns the removed guild and the invites it withdrew.
    pub fn disband(&mut self, caller: &str) -> GameResult<(Guild, Vec<PendingInvite<u32>>)> {
        let guild = self.require_guild_mut(caller)?;
        if guild.rank_of(caller) != Some(GuildRank::Leader) {
            return Err(GameError::unauthorized("only the guild leader can disband"));
        }
        let guild_id = guild.id;
        let guild = self
            .guilds
            .remove(&guild_id)
            .ok_or_else(|| GameError::invalid_state("not in a guild"))?;
        for member in &guild.members {
            self.by_member.remove(&member.name);
        }
        let withdrawn = self.invites.remove_target(guild_id);
        info!("Guild {} '{}' disbanded", guild_id, guild.name);
        Ok((guild, withdrawn))
    }

    pub fn leave(&mut self, caller: &str) -> GameResult<u32> {
        let guild = self.require_guild_mut(caller)?;
        if guild.rank_of(caller) == Some(GuildRank::Leader) {
            return Err(GameError::unauthorized(
                "leader must transfer leadership or disband",
            ));
        }
        guild.members.retain(|m| m.name != caller);
        let guild_id = guild.id;
        self.by_member.remove(caller);
        Ok(guild_id)
    }

    /// Marks a member online or offline, refreshing their level.
    pub fn set_online(&mut self, name: &str, online: bool, level: u32) -> Option<&Guild> {
        let guild = self.require_guild_mut(name).ok()?;
        let member = guild.member_mut(name)?;
        member.online = online;
        member.level = level;
        Some(&*guild)
    }

    pub fn on_disconnect(&mut self, id: ParticipantId) -> Vec<PendingInvite<u32>> {
        self.invites.remove_involving(id)
    }

    pub fn tick(&mut self, dt_ms: u64) -> Vec<PendingInvite<u32>> {
        self.invites.tick(dt_ms)
    }
}
