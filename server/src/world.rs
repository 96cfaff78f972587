use crate::error::{GameError, GameResult};
use log::info;
use shared::{
    clamp_to_world, Direction, ErrorCode, Inventory, JobClass, ParticipantId, PartyMember,
    PlayerSnapshot, ATTACK_VISUAL_MS,
};
use std::collections::HashMap;

const MAX_NAME_LEN: usize = 16;
const HP_PER_LEVEL: i32 = 10;

/// Authoritative record for one joined connection.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub job: JobClass,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub is_moving: bool,
    pub level: u32,
    pub exp: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub is_attacking: bool,
    /// Remaining cosmetic attack time; the flag clears when this hits zero.
    pub attack_visual_ms: u64,
    pub inventory: Inventory,
}

impl Participant {
    pub fn new(id: ParticipantId, name: String, job: JobClass, x: f32, y: f32) -> Self {
        let max_hp = job.base_hp();
        Self {
            id,
            name,
            job,
            x,
            y,
            direction: Direction::default(),
            is_moving: false,
            level: 1,
            exp: 0,
            hp: max_hp,
            max_hp,
            is_attacking: false,
            attack_visual_ms: 0,
            inventory: Inventory::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            job: self.job,
            x: self.x,
            y: self.y,
            direction: self.direction,
            is_moving: self.is_moving,
            level: self.level,
            hp: self.hp,
            max_hp: self.max_hp,
            is_attacking: self.is_attacking,
        }
    }

    pub fn party_member(&self) -> PartyMember {
        PartyMember {
            id: self.id,
            name: self.name.clone(),
            job: self.job,
            level: self.level,
            hp: self.hp,
            max_hp: self.max_hp,
            online: true,
        }
    }
}

/// Result of granting experience to a participant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpGrant {
    pub total: u32,
    pub level: u32,
    pub max_hp: i32,
    pub leveled_up: bool,
}

pub fn exp_to_next_level(level: u32) -> u32 {
    level * 100
}

#[derive(Debug, Default)]
pub struct World {
    players: HashMap<ParticipantId, Participant>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(
        &mut self,
        id: ParticipantId,
        name: &str,
        job: JobClass,
        x: f32,
        y: f32,
    ) -> GameResult<&Participant> {
        if self.players.contains_key(&id) {
            return Err(GameError::protocol(
                ErrorCode::AlreadyJoined,
                "already joined",
            ));
        }

        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                format!("name must be 1-{} characters", MAX_NAME_LEN),
            ));
        }
        if self.find_by_name(name).is_some() {
            return Err(GameError::protocol(
                ErrorCode::NameTaken,
                format!("{} is already online", name),
            ));
        }

        if !x.is_finite() || !y.is_finite() {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "position must be finite",
            ));
        }

        let (x, y) = clamp_to_world(x, y);
        let participant = Participant::new(id, name.to_string(), job, x, y);
        info!("Participant {} joined as {} at ({}, {})", id, name, x, y);
        Ok(&*self.players.entry(id).or_insert(participant))
    }

    pub fn leave(&mut self, id: ParticipantId) -> Option<Participant> {
        let removed = self.players.remove(&id);
        if let Some(participant) = &removed {
            info!("Participant {} ({}) left", id, participant.name);
        }
        removed
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.players.get_mut(&id)
    }

    pub fn require(&self, id: ParticipantId) -> GameResult<&Participant> {
        self.players.get(&id).ok_or_else(GameError::not_joined)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ParticipantId> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PlayerSnapshot> {
        let mut players: Vec<PlayerSnapshot> =
            self.players.values().map(Participant::snapshot).collect();
        players.sort_by_key(|p| p.id);
        players
    }

    /// Positions of participants monsters may aggro on.
    pub fn targetable_positions(&self) -> Vec<(ParticipantId, f32, f32)> {
        let mut positions: Vec<(ParticipantId, f32, f32)> = self
            .players
            .values()
            .filter(|p| p.is_alive())
            .map(|p| (p.id, p.x, p.y))
            .collect();
        positions.sort_by_key(|(id, _, _)| *id);
        positions
    }

    /// Last write wins.
    pub fn apply_movement(
        &mut self,
        id: ParticipantId,
        x: f32,
        y: f32,
        direction: Direction,
        is_moving: bool,
    ) -> GameResult<(f32, f32)> {
        let player = self.players.get_mut(&id).ok_or_else(GameError::not_joined)?;
        if !x.is_finite() || !y.is_finite() {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "position must be finite",
            ));
        }
        let (x, y) = clamp_to_world(x, y);
        player.x = x;
        player.y = y;
        player.direction = direction;
        player.is_moving = is_moving;
        Ok((x, y))
    }

    pub fn begin_attack(&mut self, id: ParticipantId, direction: Direction) -> GameResult<()> {
        let player = self.players.get_mut(&id).ok_or_else(GameError::not_joined)?;
        player.direction = direction;
        player.is_attacking = true;
        player.attack_visual_ms = ATTACK_VISUAL_MS;
        Ok(())
    }

    /// Advances cosmetic attack timers. Returns ids whose attacking flag cleared.
    pub fn advance_timers(&mut self, dt_ms: u64) -> Vec<ParticipantId> {
        let mut cleared = Vec::new();
        for player in self.players.values_mut() {
            if !player.is_attacking {
                continue;
            }
            player.attack_visual_ms = player.attack_visual_ms.saturating_sub(dt_ms);
            if player.attack_visual_ms == 0 {
                player.is_attacking = false;
                cleared.push(player.id);
            }
        }
        cleared
    }

    /// Applies monster damage. Returns the new HP, floored at zero.
    pub fn damage(&mut self, id: ParticipantId, amount: i32) -> Option<i32> {
        let player = self.players.get_mut(&id)?;
        player.hp = (player.hp - amount.max(0)).max(0);
        Some(player.hp)
    }

    pub fn respawn(&mut self, id: ParticipantId, x: f32, y: f32) -> GameResult<&Participant> {
        let player = self.players.get_mut(&id).ok_or_else(GameError::not_joined)?;
        if player.is_alive() {
            return Err(GameError::invalid_state("cannot respawn while alive"));
        }
        if !x.is_finite() || !y.is_finite() {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                "position must be finite",
            ));
        }
        let (x, y) = clamp_to_world(x, y);
        player.x = x;
        player.y = y;
        player.hp = player.max_hp;
        player.is_moving = false;
        Ok(&*player)
    }

    pub fn grant_exp(&mut self, id: ParticipantId, amount: u32) -> Option<ExpGrant> {
        let player = self.players.get_mut(&id)?;
        player.exp += amount;
        let mut leveled_up = false;
        while player.exp >= exp_to_next_level(player.level) {
            player.exp -= exp_to_next_level(player.level);
            player.level += 1;
            player.max_hp += HP_PER_LEVEL;
            leveled_up = true;
        }
        if leveled_up {
            player.hp = player.max_hp;
            info!("Participant {} reached level {}", id, player.level);
        }
        Some(ExpGrant {
            total: player.exp,
            level: player.level,
            max_hp: player.max_hp,
            leveled_up,
        })
    }

    pub fn inventory(&self, id: ParticipantId) -> Option<&Inventory> {
        self.players.get(&id).map(|p| &p.inventory)
    }

    pub fn inventory_mut(&mut self, id: ParticipantId) -> Option<&mut Inventory> {
        self.players.get_mut(&id).map(|p| &mut p.inventory)
    }
}
