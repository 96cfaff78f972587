use crate::invite::DEFAULT_INVITE_TIMEOUT_MS;
use crate::monster::SpawnPoint;
use shared::MonsterKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid map file {path}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime settings for one server process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub invite_timeout_ms: u64,
    /// JSON array of spawn points; the built-in map is used when unset.
    pub map_file: Option<PathBuf>,
    /// JSON guild store; guilds live in memory only when unset.
    pub guild_file: Option<PathBuf>,
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: 20,
            max_clients: 64,
            client_timeout: Duration::from_secs(30),
            invite_timeout_ms: DEFAULT_INVITE_TIMEOUT_MS,
            map_file: None,
            guild_file: None,
            seed: 0x5eed,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.tick_rate.max(1)))
    }

    pub fn spawn_points(&self) -> Result<Vec<SpawnPoint>, ConfigError> {
        match &self.map_file {
            Some(path) => load_map(path),
            None => Ok(default_map()),
        }
    }
}

pub fn load_map(path: &Path) -> Result<Vec<SpawnPoint>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Map {
        path: path.to_path_buf(),
        source,
    })
}

/// Meadow near the origin, a forest band, a ruin, and the dragon's lair.
pub fn default_map() -> Vec<SpawnPoint> {
    let spawn = |kind, x, y| SpawnPoint { kind, x, y };
    vec![
        spawn(MonsterKind::Slime, 300.0, 300.0),
        spawn(MonsterKind::Slime, 420.0, 260.0),
        spawn(MonsterKind::Slime, 360.0, 420.0),
        spawn(MonsterKind::Goblin, 700.0, 350.0),
        spawn(MonsterKind::Goblin, 760.0, 480.0),
        spawn(MonsterKind::Wolf, 1000.0, 700.0),
        spawn(MonsterKind::Wolf, 1100.0, 640.0),
        spawn(MonsterKind::Skeleton, 1300.0, 1200.0),
        spawn(MonsterKind::Skeleton, 1380.0, 1320.0),
        spawn(MonsterKind::Orc, 1500.0, 900.0),
        spawn(MonsterKind::Dragon, 1750.0, 1750.0),
    ]
}
