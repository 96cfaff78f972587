//! Durable guild storage.
//!
//! The simulation never waits on storage. Each roster change is applied in
//! memory first and then queued as a [`PersistOp`]; a writer running on the
//! blocking pool drains the queue into a [`GuildStore`]. Store failures are
//! logged and dropped.

use crate::error::{GameError, GameResult};
use crate::guild::Guild;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub trait GuildStore: Send + 'static {
    fn load_all(&self) -> GameResult<Vec<Guild>>;
    fn save(&mut self, guild: &Guild) -> GameResult<()>;
    fn delete(&mut self, guild_id: u32) -> GameResult<()>;
}

/// In-process store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryGuildStore {
    guilds: Arc<Mutex<BTreeMap<u32, Guild>>>,
}

impl MemoryGuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> GameResult<std::sync::MutexGuard<'_, BTreeMap<u32, Guild>>> {
        self.guilds
            .lock()
            .map_err(|_| GameError::Persistence("guild store lock poisoned".to_string()))
    }
}

impl GuildStore for MemoryGuildStore {
    fn load_all(&self) -> GameResult<Vec<Guild>> {
        Ok(self.map()?.values().cloned().collect())
    }

    fn save(&mut self, guild: &Guild) -> GameResult<()> {
        self.map()?.insert(guild.id, guild.clone());
        Ok(())
    }

    fn delete(&mut self, guild_id: u32) -> GameResult<()> {
        self.map()?.remove(&guild_id);
        Ok(())
    }
}

/// Keeps every guild in one pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonFileGuildStore {
    path: PathBuf,
}

impl JsonFileGuildStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write_all(&self, guilds: &[Guild]) -> GameResult<()> {
        let json = serde_json::to_string_pretty(guilds)
            .map_err(|e| GameError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| GameError::Persistence(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| GameError::Persistence(e.to_string()))
    }
}

impl GuildStore for JsonFileGuildStore {
    fn load_all(&self) -> GameResult<Vec<Guild>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw =
            fs::read_to_string(&self.path).map_err(|e| GameError::Persistence(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| GameError::Persistence(e.to_string()))
    }

    fn save(&mut self, guild: &Guild) -> GameResult<()> {
        let mut guilds = self.load_all()?;
        match guilds.iter_mut().find(|g| g.id == guild.id) {
            Some(existing) => *existing = guild.clone(),
            None => guilds.push(guild.clone()),
        }
        self.write_all(&guilds)
    }

    fn delete(&mut self, guild_id: u32) -> GameResult<()> {
        let mut guilds = self.load_all()?;
        guilds.retain(|g| g.id != guild_id);
        self.write_all(&guilds)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    Save(Guild),
    Delete(u32),
}

/// Fire-and-forget sender used by the simulation.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: Option<mpsc::UnboundedSender<PersistOp>>,
}

impl PersistenceHandle {
    /// A handle whose writes go nowhere; handy for tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn submit(&self, op: PersistOp) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(op).is_err() {
            warn!("Guild writer has stopped; change kept in memory only");
        }
    }

    pub fn save(&self, guild: &Guild) {
        self.submit(PersistOp::Save(guild.clone()));
    }

    pub fn delete(&self, guild_id: u32) {
        self.submit(PersistOp::Delete(guild_id));
    }
}

/// Starts the writer on the blocking pool. It exits once every handle is
/// dropped.
pub fn spawn_writer<S: GuildStore>(store: S) -> (PersistenceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::task::spawn_blocking(move || run_writer(store, rx));
    (PersistenceHandle { tx: Some(tx) }, task)
}

fn run_writer<S: GuildStore>(mut store: S, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.blocking_recv() {
        let result = match &op {
            PersistOp::Save(guild) => store.save(guild),
            PersistOp::Delete(guild_id) => store.delete(*guild_id),
        };
        match result {
            Ok(()) => debug!("Persisted {}", op_label(&op)),
            Err(e) => warn!("Failed to persist {}: {}", op_label(&op), e),
        }
    }
    debug!("Guild writer stopped");
}

fn op_label(op: &PersistOp) -> String {
    match op {
        PersistOp::Save(guild) => format!("guild {} save", guild.id),
        PersistOp::Delete(guild_id) => format!("guild {} delete", guild_id),
    }
}
