//! Damage resolution against monsters.
//!
//! The raw damage value is whatever the attacking client reports; only the
//! defense floor and the kill boundary are decided here.

use crate::broadcast::Outbox;
use crate::error::{GameError, GameResult};
use crate::monster::MonsterTable;
use log::debug;
use shared::{MonsterId, ParticipantId, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    pub monster_id: MonsterId,
    pub actual_damage: i32,
    pub hp: i32,
    pub killed: bool,
    /// Exp reward, non-zero only on the killing blow.
    pub exp: u32,
}

/// Defense never nullifies a hit completely.
pub fn mitigate(raw_damage: i32, defense: i32) -> i32 {
    raw_damage.saturating_sub(defense).max(1)
}

pub fn resolve_damage(
    monsters: &mut MonsterTable,
    monster_id: MonsterId,
    raw_damage: i32,
    attacker: ParticipantId,
) -> GameResult<DamageOutcome> {
    let monster = monsters
        .get_mut(monster_id)
        .ok_or_else(|| GameError::unknown_target(format!("no monster {}", monster_id)))?;
    if !monster.alive {
        return Err(GameError::invalid_state(format!(
            "monster {} is already dead",
            monster_id
        )));
    }

    let config = monster.config();
    let actual_damage = mitigate(raw_damage, config.defense);
    monster.hp = (monster.hp - actual_damage).max(0);

    if monster.hp == 0 {
        monster.alive = false;
        monster.target = None;
        monster.respawn_timer_ms = config.respawn_ms;
        debug!(
            "Monster {} killed by participant {} ({} exp)",
            monster_id, attacker, config.exp
        );
        return Ok(DamageOutcome {
            monster_id,
            actual_damage,
            hp: 0,
            killed: true,
            exp: config.exp,
        });
    }

    monster.provoke(attacker);
    Ok(DamageOutcome {
        monster_id,
        actual_damage,
        hp: monster.hp,
        killed: false,
        exp: 0,
    })
}

/// Kill events and floating damage numbers go to every participant.
pub fn announce(outcome: &DamageOutcome, attacker: ParticipantId, out: &mut Outbox) {
    if outcome.killed {
        out.broadcast(ServerEvent::MonsterKilled {
            monster_id: outcome.monster_id,
            killer_id: attacker,
            exp: outcome.exp,
        });
    } else {
        out.broadcast(ServerEvent::MonsterDamaged {
            monster_id: outcome.monster_id,
            attacker_id: attacker,
            damage: outcome.actual_damage,
            hp: outcome.hp,
        });
    }
}
