use serde::{Deserialize, Serialize};

pub type ParticipantId = u32;
pub type MonsterId = u32;
pub type ItemId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Down
    }
}

impl Direction {
    /// Picks the cardinal direction closest to the given movement vector.
    pub fn from_vector(dx: f32, dy: f32) -> Self {
        if dx.abs() >= dy.abs() {
            if dx < 0.0 {
                Direction::Left
            } else {
                Direction::Right
            }
        } else if dy < 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobClass {
    Warrior,
    Mage,
    Archer,
    Thief,
}

impl JobClass {
    pub fn base_hp(self) -> i32 {
        match self {
            JobClass::Warrior => 150,
            JobClass::Mage => 80,
            JobClass::Archer => 100,
            JobClass::Thief => 90,
        }
    }
}

/// Everything other participants need to render a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: ParticipantId,
    pub name: String,
    pub job: JobClass,
    pub x: f32,
    pub y: f32,
    pub direction: Direction,
    pub is_moving: bool,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub is_attacking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonsterKind {
    Slime,
    Goblin,
    Wolf,
    Skeleton,
    Orc,
    Dragon,
}

/// Static per-kind tuning. Ranges are in world units, times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonsterConfig {
    pub max_hp: i32,
    pub attack: i32,
    pub defense: i32,
    pub speed: f32,
    pub exp: u32,
    pub aggro_range: f32,
    pub attack_range: f32,
    pub respawn_ms: u64,
    pub boss: bool,
    pub loot: &'static [&'static str],
}

impl MonsterKind {
    pub const ALL: [MonsterKind; 6] = [
        MonsterKind::Slime,
        MonsterKind::Goblin,
        MonsterKind::Wolf,
        MonsterKind::Skeleton,
        MonsterKind::Orc,
        MonsterKind::Dragon,
    ];

    pub fn config(self) -> MonsterConfig {
        match self {
            MonsterKind::Slime => MonsterConfig {
                max_hp: 50,
                attack: 5,
                defense: 2,
                speed: 40.0,
                exp: 25,
                aggro_range: 150.0,
                attack_range: 40.0,
                respawn_ms: 10_000,
                boss: false,
                loot: &["slime_gel", "small_potion"],
            },
            MonsterKind::Goblin => MonsterConfig {
                max_hp: 80,
                attack: 8,
                defense: 4,
                speed: 60.0,
                exp: 40,
                aggro_range: 180.0,
                attack_range: 45.0,
                respawn_ms: 12_000,
                boss: false,
                loot: &["goblin_ear", "dagger"],
            },
            MonsterKind::Wolf => MonsterConfig {
                max_hp: 100,
                attack: 12,
                defense: 5,
                speed: 90.0,
                exp: 60,
                aggro_range: 220.0,
                attack_range: 45.0,
                respawn_ms: 15_000,
                boss: false,
                loot: &["wolf_pelt"],
            },
            MonsterKind::Skeleton => MonsterConfig {
                max_hp: 150,
                attack: 15,
                defense: 8,
                speed: 50.0,
                exp: 90,
                aggro_range: 200.0,
                attack_range: 50.0,
                respawn_ms: 20_000,
                boss: false,
                loot: &["bone", "rusty_sword"],
            },
            MonsterKind::Orc => MonsterConfig {
                max_hp: 220,
                attack: 20,
                defense: 12,
                speed: 55.0,
                exp: 140,
                aggro_range: 200.0,
                attack_range: 55.0,
                respawn_ms: 25_000,
                boss: false,
                loot: &["orc_tusk", "iron_shield"],
            },
            MonsterKind::Dragon => MonsterConfig {
                max_hp: 1200,
                attack: 45,
                defense: 25,
                speed: 70.0,
                exp: 1000,
                aggro_range: 300.0,
                attack_range: 90.0,
                respawn_ms: 120_000,
                boss: true,
                loot: &["dragon_scale", "dragon_heart"],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonsterState {
    Idle,
    Chase,
    Attack,
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterSnapshot {
    pub id: MonsterId,
    pub kind: MonsterKind,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub max_hp: i32,
    pub alive: bool,
    pub state: MonsterState,
    pub boss: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, quantity: u32) -> Self {
        Self {
            item: item.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loot {
    Gold(u64),
    Item(ItemStack),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundItem {
    pub id: ItemId,
    pub x: f32,
    pub y: f32,
    pub loot: Loot,
}

/// One side of a trade session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    pub items: Vec<ItemStack>,
    pub gold: u64,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMember {
    pub id: ParticipantId,
    pub name: String,
    pub job: JobClass,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub id: u32,
    pub leader: ParticipantId,
    pub members: Vec<PartyMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuildRank {
    Leader,
    Officer,
    Member,
}

/// Guild roster entry. `name` is the durable character id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildMember {
    pub name: String,
    pub rank: GuildRank,
    pub job: JobClass,
    pub level: u32,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildInfo {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub leader: String,
    pub members: Vec<GuildMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatChannel {
    Global,
    Party,
    Guild,
    Whisper,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSlot {
    pub id: ParticipantId,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRoomInfo {
    pub id: u32,
    pub name: String,
    pub host: ParticipantId,
    pub max_players: u8,
    pub members: Vec<MatchSlot>,
    pub started: bool,
}

/// Error catalog carried by `ServerEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotJoined,
    AlreadyJoined,
    NameTaken,
    UnknownTarget,
    InvalidState,
    InvalidPayload,
    NotAuthorized,
    PartyFull,
    RoomFull,
    InventoryFull,
    InsufficientItems,
    OutOfRange,
    ServerFull,
    PersistenceFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_vector() {
        assert_eq!(Direction::from_vector(1.0, 0.2), Direction::Right);
        assert_eq!(Direction::from_vector(-3.0, 1.0), Direction::Left);
        assert_eq!(Direction::from_vector(0.1, -2.0), Direction::Up);
        assert_eq!(Direction::from_vector(0.0, 5.0), Direction::Down);
    }

    #[test]
    fn test_slime_config() {
        let config = MonsterKind::Slime.config();
        assert_eq!(config.max_hp, 50);
        assert_eq!(config.defense, 2);
        assert_eq!(config.exp, 25);
        assert_eq!(config.aggro_range, 150.0);
        assert_eq!(config.respawn_ms, 10_000);
        assert!(!config.boss);
    }

    #[test]
    fn test_only_dragon_is_boss() {
        let bosses: Vec<MonsterKind> = MonsterKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.config().boss)
            .collect();
        assert_eq!(bosses, vec![MonsterKind::Dragon]);
    }

    #[test]
    fn test_attack_range_inside_aggro_range() {
        for kind in MonsterKind::ALL {
            let config = kind.config();
            assert!(config.attack_range < config.aggro_range, "{:?}", kind);
            assert!(!config.loot.is_empty(), "{:?}", kind);
        }
    }
}
