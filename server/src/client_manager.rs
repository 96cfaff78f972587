//! Connection bookkeeping for the realm server
//!
//! This module tracks every open TCP connection, independent of whether the
//! connection has joined the world yet:
//! - Connection lifecycle (accept, disconnect, idle timeout)
//! - Capacity enforcement and participant id assignment
//! - Per-connection outbound queues the writer tasks drain
//!
//! Broadcast targets only reach connections that completed `player:join`;
//! targeted events reach any connection so errors can be reported before a
//! successful join.

use crate::broadcast::{Outgoing, Target};
use log::{debug, info};
use shared::{ParticipantId, ServerEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// One open connection.
#[derive(Debug)]
pub struct Client {
    /// Participant id assigned on accept
    pub id: ParticipantId,
    pub addr: SocketAddr,
    /// Last time any frame arrived from this connection
    pub last_seen: Instant,
    /// Queue feeding the connection's writer task
    pub sender: UnboundedSender<ServerEvent>,
    /// Set once `player:join` succeeded
    pub joined: bool,
}

impl Client {
    pub fn new(id: ParticipantId, addr: SocketAddr, sender: UnboundedSender<ServerEvent>) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            sender,
            joined: false,
        }
    }

    /// Returns true if nothing arrived within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Queues an event for the writer. A closed queue means the connection
    /// is already going away, so the event is dropped.
    pub fn queue(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Owns the live connection set.
///
/// Ids start at 1 and are never reused within one server process, so a
/// stale id from a closed connection can never address a newer one.
pub struct ClientManager {
    clients: HashMap<ParticipantId, Client>,
    next_client_id: ParticipantId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns `None` when the server is at capacity; the caller answers
    /// with a `ServerFull` error and closes the socket.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: UnboundedSender<ServerEvent>,
    ) -> Option<ParticipantId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));
        Some(client_id)
    }

    /// Drops a connection. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: ParticipantId) -> bool {
        match self.clients.remove(&client_id) {
            Some(client) => {
                info!("Client {} ({}) disconnected", client.id, client.addr);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: ParticipantId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Refreshes the idle timer after an inbound frame.
    pub fn touch(&mut self, client_id: ParticipantId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    pub fn mark_joined(&mut self, client_id: ParticipantId, joined: bool) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.joined = joined;
        }
    }

    /// Removes and returns every connection that went quiet.
    pub fn check_timeouts(&mut self) -> Vec<ParticipantId> {
        let timeout = self.timeout;
        let mut timed_out: Vec<ParticipantId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();
        timed_out.sort_unstable();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.remove_client(*client_id);
        }
        timed_out
    }

    /// Routes one outbound record to the matching connections.
    pub fn deliver(&self, outgoing: &Outgoing) {
        match &outgoing.target {
            Target::One(id) => self.deliver_to(*id, &outgoing.event),
            Target::Many(ids) => {
                for id in ids {
                    self.deliver_to(*id, &outgoing.event);
                }
            }
            target => {
                for client in self.clients.values() {
                    if client.joined && target.includes(client.id) {
                        client.queue(outgoing.event.clone());
                    }
                }
            }
        }
    }

    fn deliver_to(&self, id: ParticipantId, event: &ServerEvent) {
        match self.clients.get(&id) {
            Some(client) => {
                client.queue(event.clone());
            }
            None => debug!("Dropping {} for closed connection {}", event.name(), id),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
