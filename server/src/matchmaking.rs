//! PvP match lobby: hosted rooms plus a FIFO quick-match queue.

use crate::error::{GameError, GameResult};
use log::debug;
use shared::{ErrorCode, MatchRoomInfo, MatchSlot, ParticipantId};
use std::collections::{BTreeMap, HashMap, VecDeque};

pub const MIN_ROOM_PLAYERS: u8 = 2;
pub const MAX_ROOM_PLAYERS: u8 = 8;
const MAX_ROOM_NAME: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRoom {
    pub id: u32,
    pub name: String,
    pub host: ParticipantId,
    pub max_players: u8,
    pub members: Vec<MatchSlot>,
    pub started: bool,
}

impl MatchRoom {
    pub fn info(&self) -> MatchRoomInfo {
        MatchRoomInfo {
            id: self.id,
            name: self.name.clone(),
            host: self.host,
            max_players: self.max_players,
            members: self.members.clone(),
            started: self.started,
        }
    }

    pub fn member_ids(&self) -> Vec<ParticipantId> {
        self.members.iter().map(|slot| slot.id).collect()
    }

    fn is_full(&self) -> bool {
        self.members.len() >= usize::from(self.max_players)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Queued(usize),
    Found(MatchRoom),
}

/// What remains of a room after someone left it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDeparture {
    pub room_id: u32,
    /// `None` when the room emptied and was removed.
    pub room: Option<MatchRoom>,
}

#[derive(Debug, Default)]
pub struct MatchManager {
    rooms: BTreeMap<u32, MatchRoom>,
    by_member: HashMap<ParticipantId, u32>,
    queue: VecDeque<(ParticipantId, String)>,
    next_id: u32,
}

impl MatchManager {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn get(&self, room_id: u32) -> Option<&MatchRoom> {
        self.rooms.get(&room_id)
    }

    pub fn room_of(&self, id: ParticipantId) -> Option<&MatchRoom> {
        self.by_member
            .get(&id)
            .and_then(|room_id| self.rooms.get(room_id))
    }

    pub fn is_searching(&self, id: ParticipantId) -> bool {
        self.queue.iter().any(|(queued, _)| *queued == id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn ensure_free(&self, id: ParticipantId) -> GameResult<()> {
        if self.by_member.contains_key(&id) {
            return Err(GameError::invalid_state("already in a match room"));
        }
        if self.is_searching(id) {
            return Err(GameError::invalid_state("already searching for a match"));
        }
        Ok(())
    }

    fn open_room(&mut self, name: String, host: ParticipantId, max_players: u8) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.rooms.insert(
            id,
            MatchRoom {
                id,
                name,
                host,
                max_players,
                members: Vec::new(),
                started: false,
            },
        );
        id
    }

    pub fn create(
        &mut self,
        host: ParticipantId,
        host_name: &str,
        name: &str,
        max_players: u8,
    ) -> GameResult<&MatchRoom> {
        if !(MIN_ROOM_PLAYERS..=MAX_ROOM_PLAYERS).contains(&max_players) {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                format!(
                    "rooms hold {}-{} players",
                    MIN_ROOM_PLAYERS, MAX_ROOM_PLAYERS
                ),
            ));
        }
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_ROOM_NAME {
            return Err(GameError::protocol(
                ErrorCode::InvalidPayload,
                format!("room name must be 1-{} characters", MAX_ROOM_NAME),
            ));
        }
        self.ensure_free(host)?;

        let room_id = self.open_room(name.to_string(), host, max_players);
        self.seat(room_id, host, host_name, false);
        debug!("Match room {} created by {}", room_id, host);
        self.rooms
            .get(&room_id)
            .ok_or_else(|| GameError::invalid_state("room vanished"))
    }

    pub fn join(&mut self, id: ParticipantId, name: &str, room_id: u32) -> GameResult<&MatchRoom> {
        self.ensure_free(id)?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| GameError::unknown_target(format!("no match room {}", room_id)))?;
        if room.started {
            return Err(GameError::invalid_state("match already started"));
        }
        if room.is_full() {
            return Err(GameError::capacity(ErrorCode::RoomFull, "room is full"));
        }
        self.seat(room_id, id, name, false);
        self.rooms
            .get(&room_id)
            .ok_or_else(|| GameError::invalid_state("room vanished"))
    }

    fn seat(&mut self, room_id: u32, id: ParticipantId, name: &str, ready: bool) {
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.members.push(MatchSlot {
                id,
                name: name.to_string(),
                ready,
            });
            self.by_member.insert(id, room_id);
        }
    }

    /// A departing host hands the room to the earliest remaining member.
    pub fn leave(&mut self, id: ParticipantId) -> GameResult<RoomDeparture> {
        let room_id = self
            .by_member
            .remove(&id)
            .ok_or_else(|| GameError::invalid_state("not in a match room"))?;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Ok(RoomDeparture {
                room_id,
                room: None,
            });
        };

        room.members.retain(|slot| slot.id != id);
        if room.members.is_empty() {
            self.rooms.remove(&room_id);
            debug!("Match room {} closed", room_id);
            return Ok(RoomDeparture {
                room_id,
                room: None,
            });
        }
        if room.host == id {
            room.host = room.members[0].id;
        }
        Ok(RoomDeparture {
            room_id,
            room: Some(room.clone()),
        })
    }

    pub fn set_ready(&mut self, id: ParticipantId, ready: bool) -> GameResult<&MatchRoom> {
        let room_id = *self
            .by_member
            .get(&id)
            .ok_or_else(|| GameError::invalid_state("not in a match room"))?;
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| GameError::invalid_state("not in a match room"))?;
        if room.started {
            return Err(GameError::invalid_state("match already started"));
        }
        if let Some(slot) = room.members.iter_mut().find(|slot| slot.id == id) {
            slot.ready = ready;
        }
        Ok(&*room)
    }

    pub fn start(&mut self, id: ParticipantId) -> GameResult<&MatchRoom> {
        let room_id = *self
            .by_member
            .get(&id)
            .ok_or_else(|| GameError::invalid_state("not in a match room"))?;
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| GameError::invalid_state("not in a match room"))?;
        if room.host != id {
            return Err(GameError::unauthorized("only the host can start the match"));
        }
        if room.started {
            return Err(GameError::invalid_state("match already started"));
        }
        if room.members.len() < usize::from(MIN_ROOM_PLAYERS) {
            return Err(GameError::invalid_state("need at least two players"));
        }
        if !room.members.iter().all(|slot| slot.ready) {
            return Err(GameError::invalid_state("not everyone is ready"));
        }
        room.started = true;
        debug!("Match room {} started", room_id);
        Ok(&*room)
    }

    /// Queues the participant; the second one in pairs off with the first.
    pub fn search(&mut self, id: ParticipantId, name: &str) -> GameResult<SearchOutcome> {
        self.ensure_free(id)?;
        self.queue.push_back((id, name.to_string()));
        if self.queue.len() < 2 {
            return Ok(SearchOutcome::Queued(self.queue.len()));
        }

        let (Some(first), Some(second)) = (self.queue.pop_front(), self.queue.pop_front()) else {
            return Ok(SearchOutcome::Queued(self.queue.len()));
        };
        let name = format!("Quick match {}", self.next_id);
        let room_id = self.open_room(name, first.0, 2);
        self.seat(room_id, first.0, &first.1, true);
        self.seat(room_id, second.0, &second.1, true);
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| GameError::invalid_state("room vanished"))?;
        room.started = true;
        Ok(SearchOutcome::Found(room.clone()))
    }

    pub fn cancel_search(&mut self, id: ParticipantId) -> GameResult<()> {
        let before = self.queue.len();
        self.queue.retain(|(queued, _)| *queued != id);
        if self.queue.len() == before {
            return Err(GameError::invalid_state("not searching"));
        }
        Ok(())
    }

    pub fn on_disconnect(&mut self, id: ParticipantId) -> Option<RoomDeparture> {
        self.queue.retain(|(queued, _)| *queued != id);
        self.leave(id).ok()
    }
}
