//! Monster AI simulation.
//!
//! Each living monster runs a four-state machine (idle, chase, attack,
//! return) advanced once per tick. All timers are countdown fields in
//! milliseconds so a test can drive the simulation with fixed deltas.
//!
//! Monsters are never removed. Death flips `alive` and arms the respawn
//! countdown; when it runs out the monster is healed and reset at its spawn
//! origin in place.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shared::{
    distance, step_toward, MonsterConfig, MonsterId, MonsterKind, MonsterSnapshot, MonsterState,
    ParticipantId,
};
use std::collections::BTreeMap;
use std::f32::consts::TAU;

pub const WANDER_RADIUS: f32 = 100.0;
pub const WANDER_MIN_MS: u64 = 2_000;
pub const WANDER_MAX_MS: u64 = 5_000;
pub const ATTACK_COOLDOWN_MS: u64 = 1_500;
pub const BOSS_ATTACK_COOLDOWN_MS: u64 = 2_000;
pub const ARRIVAL_DISTANCE: f32 = 10.0;

const WANDER_SPEED_FACTOR: f32 = 0.5;
const RETURN_SPEED_FACTOR: f32 = 0.8;
const LEASH_FACTOR: f32 = 2.0;
const CHASE_GIVE_UP_FACTOR: f32 = 1.5;
const ATTACK_BREAK_FACTOR: f32 = 1.2;
const REAGGRO_FACTOR: f32 = 0.8;
const RETURN_HEAL_FRACTION: i32 = 10;

/// One spawn entry of a map file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub kind: MonsterKind,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone)]
pub struct Monster {
    pub id: MonsterId,
    pub kind: MonsterKind,
    /// Only the combat resolver decrements this.
    pub(crate) hp: i32,
    pub alive: bool,
    pub spawn_x: f32,
    pub spawn_y: f32,
    pub x: f32,
    pub y: f32,
    pub state: MonsterState,
    pub target: Option<ParticipantId>,
    pub respawn_timer_ms: u64,
    pub attack_cooldown_ms: u64,
    pub wander_timer_ms: u64,
    pub wander_target: Option<(f32, f32)>,
    pub boss: bool,
}

impl Monster {
    pub fn new(id: MonsterId, kind: MonsterKind, x: f32, y: f32, wander_timer_ms: u64) -> Self {
        let config = kind.config();
        Self {
            id,
            kind,
            hp: config.max_hp,
            alive: true,
            spawn_x: x,
            spawn_y: y,
            x,
            y,
            state: MonsterState::Idle,
            target: None,
            respawn_timer_ms: 0,
            attack_cooldown_ms: 0,
            wander_timer_ms,
            wander_target: None,
            boss: config.boss,
        }
    }

    pub fn config(&self) -> MonsterConfig {
        self.kind.config()
    }

    pub fn hp(&self) -> i32 {
        self.hp
    }

    pub fn max_hp(&self) -> i32 {
        self.config().max_hp
    }

    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        distance(self.x, self.y, x, y)
    }

    pub fn distance_from_spawn(&self) -> f32 {
        distance(self.x, self.y, self.spawn_x, self.spawn_y)
    }

    pub fn attack_cooldown(&self) -> u64 {
        if self.boss {
            BOSS_ATTACK_COOLDOWN_MS
        } else {
            ATTACK_COOLDOWN_MS
        }
    }

    pub fn snapshot(&self) -> MonsterSnapshot {
        MonsterSnapshot {
            id: self.id,
            kind: self.kind,
            x: self.x,
            y: self.y,
            hp: self.hp,
            max_hp: self.max_hp(),
            alive: self.alive,
            state: self.state,
            boss: self.boss,
        }
    }

    /// Damage always aggros an idle or returning monster onto the attacker.
    pub fn provoke(&mut self, attacker: ParticipantId) {
        if matches!(self.state, MonsterState::Idle | MonsterState::Return) {
            self.state = MonsterState::Chase;
            self.target = Some(attacker);
            self.wander_target = None;
        }
    }

    fn move_toward(&mut self, tx: f32, ty: f32, speed: f32, dt_secs: f32) {
        let (x, y) = step_toward(self.x, self.y, tx, ty, speed * dt_secs);
        self.x = x;
        self.y = y;
    }

    fn respawn(&mut self) {
        self.hp = self.max_hp();
        self.alive = true;
        self.x = self.spawn_x;
        self.y = self.spawn_y;
        self.state = MonsterState::Idle;
        self.target = None;
        self.attack_cooldown_ms = 0;
        self.wander_target = None;
    }
}

/// A monster in attack state firing at its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonsterAttack {
    pub monster_id: MonsterId,
    pub target_id: ParticipantId,
    pub damage: i32,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub attacks: Vec<MonsterAttack>,
    pub respawned: Vec<MonsterId>,
    /// Snapshots of monsters whose position, state or liveness changed.
    pub changed: Vec<MonsterSnapshot>,
}

pub struct MonsterTable {
    monsters: BTreeMap<MonsterId, Monster>,
    rng: StdRng,
}

impl MonsterTable {
    pub fn new(seed: u64) -> Self {
        Self {
            monsters: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Replaces the table with one monster per spawn point, ids from 1.
    pub fn load_map(&mut self, spawns: &[SpawnPoint]) {
        self.monsters.clear();
        for (index, spawn) in spawns.iter().enumerate() {
            let id = index as MonsterId + 1;
            let wander = self.rng.gen_range(WANDER_MIN_MS..=WANDER_MAX_MS);
            self.monsters
                .insert(id, Monster::new(id, spawn.kind, spawn.x, spawn.y, wander));
        }
        debug!("Loaded {} monsters", self.monsters.len());
    }

    pub fn get(&self, id: MonsterId) -> Option<&Monster> {
        self.monsters.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: MonsterId) -> Option<&mut Monster> {
        self.monsters.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.monsters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monsters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Monster> {
        self.monsters.values()
    }

    pub fn snapshots(&self) -> Vec<MonsterSnapshot> {
        self.monsters.values().map(Monster::snapshot).collect()
    }

    /// Drops any chase or attack aimed at a participant that left.
    pub fn forget_target(&mut self, participant: ParticipantId) {
        for monster in self.monsters.values_mut() {
            if monster.target == Some(participant) {
                monster.target = None;
            }
        }
    }

    /// Advances every monster by `dt_ms`. `participants` holds the ids and
    /// positions of everyone a monster may aggro on.
    pub fn tick(&mut self, dt_ms: u64, participants: &[(ParticipantId, f32, f32)]) -> TickReport {
        let mut report = TickReport::default();
        let rng = &mut self.rng;

        for monster in self.monsters.values_mut() {
            let before = (monster.x, monster.y, monster.state, monster.alive);

            if monster.alive {
                if let Some(attack) = step_alive(monster, dt_ms, participants, rng) {
                    report.attacks.push(attack);
                }
            } else {
                monster.respawn_timer_ms = monster.respawn_timer_ms.saturating_sub(dt_ms);
                if monster.respawn_timer_ms == 0 {
                    monster.respawn();
                    monster.wander_timer_ms = rng.gen_range(WANDER_MIN_MS..=WANDER_MAX_MS);
                    debug!("Monster {} respawned", monster.id);
                    report.respawned.push(monster.id);
                }
            }

            if before != (monster.x, monster.y, monster.state, monster.alive) {
                report.changed.push(monster.snapshot());
            }
        }

        report
    }
}

fn nearest(
    x: f32,
    y: f32,
    participants: &[(ParticipantId, f32, f32)],
) -> Option<(ParticipantId, f32, f32, f32)> {
    participants
        .iter()
        .map(|&(id, px, py)| (id, px, py, distance(x, y, px, py)))
        .min_by(|a, b| a.3.total_cmp(&b.3).then(a.0.cmp(&b.0)))
}

fn position_of(
    id: ParticipantId,
    participants: &[(ParticipantId, f32, f32)],
) -> Option<(f32, f32)> {
    participants
        .iter()
        .find(|(pid, _, _)| *pid == id)
        .map(|&(_, x, y)| (x, y))
}

fn step_alive(
    monster: &mut Monster,
    dt_ms: u64,
    participants: &[(ParticipantId, f32, f32)],
    rng: &mut StdRng,
) -> Option<MonsterAttack> {
    let config = monster.config();
    let dt_secs = dt_ms as f32 / 1000.0;
    let closest = nearest(monster.x, monster.y, participants);

    match monster.state {
        MonsterState::Idle => {
            if let Some((id, _, _, dist)) = closest {
                if dist <= config.aggro_range {
                    monster.state = MonsterState::Chase;
                    monster.target = Some(id);
                    monster.wander_target = None;
                    return None;
                }
            }

            monster.wander_timer_ms = monster.wander_timer_ms.saturating_sub(dt_ms);
            if monster.wander_timer_ms == 0 {
                let angle = rng.gen_range(0.0..TAU);
                let radius = rng.gen_range(0.0..WANDER_RADIUS);
                monster.wander_target = Some((
                    monster.spawn_x + angle.cos() * radius,
                    monster.spawn_y + angle.sin() * radius,
                ));
                monster.wander_timer_ms = rng.gen_range(WANDER_MIN_MS..=WANDER_MAX_MS);
            }

            if let Some((tx, ty)) = monster.wander_target {
                monster.move_toward(tx, ty, config.speed * WANDER_SPEED_FACTOR, dt_secs);
                if monster.distance_to(tx, ty) < 0.5 {
                    monster.wander_target = None;
                }
            }
            None
        }

        MonsterState::Chase => {
            let chased = monster
                .target
                .and_then(|id| position_of(id, participants).map(|(x, y)| (id, x, y)))
                .or_else(|| {
                    closest
                        .filter(|c| c.3 <= config.aggro_range)
                        .map(|(id, x, y, _)| (id, x, y))
                });

            let Some((id, tx, ty)) = chased else {
                monster.state = MonsterState::Return;
                monster.target = None;
                return None;
            };
            monster.target = Some(id);

            let dist = monster.distance_to(tx, ty);
            if monster.distance_from_spawn() > config.aggro_range * LEASH_FACTOR
                || dist > config.aggro_range * CHASE_GIVE_UP_FACTOR
            {
                monster.state = MonsterState::Return;
                monster.target = None;
            } else if dist <= config.attack_range {
                monster.state = MonsterState::Attack;
            } else {
                monster.move_toward(tx, ty, config.speed, dt_secs);
            }
            None
        }

        MonsterState::Attack => {
            let Some((id, (tx, ty))) = monster
                .target
                .and_then(|id| position_of(id, participants).map(|pos| (id, pos)))
            else {
                monster.state = MonsterState::Return;
                monster.target = None;
                return None;
            };

            if monster.distance_to(tx, ty) > config.attack_range * ATTACK_BREAK_FACTOR {
                monster.state = MonsterState::Chase;
                return None;
            }

            monster.attack_cooldown_ms = monster.attack_cooldown_ms.saturating_sub(dt_ms);
            if monster.attack_cooldown_ms > 0 {
                return None;
            }
            monster.attack_cooldown_ms = monster.attack_cooldown();
            Some(MonsterAttack {
                monster_id: monster.id,
                target_id: id,
                damage: config.attack,
            })
        }

        MonsterState::Return => {
            if let Some((id, _, _, dist)) = closest {
                if dist <= config.aggro_range * REAGGRO_FACTOR {
                    monster.state = MonsterState::Chase;
                    monster.target = Some(id);
                    return None;
                }
            }

            let (sx, sy) = (monster.spawn_x, monster.spawn_y);
            monster.move_toward(sx, sy, config.speed * RETURN_SPEED_FACTOR, dt_secs);
            if monster.distance_from_spawn() < ARRIVAL_DISTANCE {
                monster.state = MonsterState::Idle;
                monster.target = None;
                let max_hp = monster.max_hp();
                monster.hp = (monster.hp + max_hp / RETURN_HEAL_FRACTION).min(max_hp);
            }
            None
        }
    }
}
