//! Headless driver that plays a participant on its own.
//!
//! Each step looks at the mirror and produces the events a player would
//! send: wander, close in on the nearest monster, swing when in reach,
//! pick up nearby loot, and respawn after dying.

use crate::mirror::WorldMirror;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    distance, step_toward, ClientEvent, Direction, JobClass, MonsterSnapshot, PICKUP_RANGE,
    WORLD_HEIGHT, WORLD_WIDTH,
};

pub const BOT_SPEED: f32 = 120.0;
pub const ATTACK_REACH: f32 = 60.0;
pub const SIGHT_RANGE: f32 = 300.0;
pub const ACTION_COOLDOWN_MS: u64 = 600;
pub const RESPAWN_POINT: (f32, f32) = (100.0, 100.0);

/// Damage a participant deals before monster defense is applied.
pub fn raw_damage(job: JobClass, level: u32) -> i32 {
    let base = match job {
        JobClass::Warrior => 20,
        JobClass::Mage => 25,
        JobClass::Archer => 18,
        JobClass::Thief => 15,
    };
    base + 2 * level.saturating_sub(1) as i32
}

pub struct Bot {
    rng: StdRng,
    wander_target: Option<(f32, f32)>,
    cooldown_ms: u64,
}

impl Bot {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            wander_target: None,
            cooldown_ms: 0,
        }
    }

    /// Decides what to send after `dt_ms` of wall time.
    pub fn step(&mut self, mirror: &WorldMirror, dt_ms: u64) -> Vec<ClientEvent> {
        self.cooldown_ms = self.cooldown_ms.saturating_sub(dt_ms);
        let Some(me) = mirror.local() else {
            return Vec::new();
        };

        if me.hp <= 0 {
            if self.cooldown_ms > 0 {
                return Vec::new();
            }
            self.cooldown_ms = ACTION_COOLDOWN_MS * 5;
            let (x, y) = RESPAWN_POINT;
            return vec![ClientEvent::Respawn { x, y }];
        }

        if self.cooldown_ms == 0 {
            let loot = mirror
                .items()
                .filter(|item| distance(me.x, me.y, item.x, item.y) <= PICKUP_RANGE)
                .min_by(|a, b| {
                    distance(me.x, me.y, a.x, a.y).total_cmp(&distance(me.x, me.y, b.x, b.y))
                });
            if let Some(item) = loot {
                self.cooldown_ms = ACTION_COOLDOWN_MS;
                return vec![ClientEvent::ItemPickup { item_id: item.id }];
            }
        }

        let step = BOT_SPEED * dt_ms as f32 / 1000.0;
        match nearest_monster(mirror, me.x, me.y) {
            Some(monster) if distance(me.x, me.y, monster.x, monster.y) <= ATTACK_REACH => {
                if self.cooldown_ms > 0 {
                    return Vec::new();
                }
                self.cooldown_ms = ACTION_COOLDOWN_MS;
                let direction = Direction::from_vector(monster.x - me.x, monster.y - me.y);
                vec![
                    ClientEvent::Attack {
                        direction,
                        target_monster_ids: vec![monster.id],
                    },
                    predicted_hit(monster, raw_damage(me.job, me.level)),
                ]
            }
            Some(monster) => vec![move_toward(me.x, me.y, monster.x, monster.y, step)],
            None => {
                let (tx, ty) = self.next_waypoint(me.x, me.y);
                vec![move_toward(me.x, me.y, tx, ty, step)]
            }
        }
    }

    fn next_waypoint(&mut self, x: f32, y: f32) -> (f32, f32) {
        match self.wander_target {
            Some((tx, ty)) if distance(x, y, tx, ty) > 1.0 => (tx, ty),
            _ => {
                let target = (
                    self.rng.gen_range(0.0..WORLD_WIDTH),
                    self.rng.gen_range(0.0..WORLD_HEIGHT),
                );
                self.wander_target = Some(target);
                target
            }
        }
    }
}

fn nearest_monster(mirror: &WorldMirror, x: f32, y: f32) -> Option<&MonsterSnapshot> {
    mirror
        .monsters()
        .filter(|m| m.alive && distance(x, y, m.x, m.y) <= SIGHT_RANGE)
        .min_by(|a, b| {
            distance(x, y, a.x, a.y)
                .total_cmp(&distance(x, y, b.x, b.y))
                .then(a.id.cmp(&b.id))
        })
}

fn move_toward(x: f32, y: f32, tx: f32, ty: f32, step: f32) -> ClientEvent {
    let (nx, ny) = step_toward(x, y, tx, ty, step);
    ClientEvent::Move {
        x: nx,
        y: ny,
        direction: Direction::from_vector(tx - x, ty - y),
        is_moving: true,
    }
}

/// The server recomputes the outcome; only id and damage are used.
fn predicted_hit(monster: &MonsterSnapshot, raw: i32) -> ClientEvent {
    let config = monster.kind.config();
    let damage = (raw - config.defense).max(1);
    let new_hp = (monster.hp - damage).max(0);
    let killed = new_hp == 0;
    ClientEvent::MonsterDamage {
        monster_id: monster.id,
        damage: raw,
        new_hp,
        killed,
        exp: if killed { config.exp } else { 0 },
    }
}
