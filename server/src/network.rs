//! Server network layer: TCP connections feeding the simulation loop

use crate::broadcast::Outbox;
use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::error::{GameError, GameResult};
use crate::guild::Guild;
use crate::persistence::{
    spawn_writer, GuildStore, JsonFileGuildStore, MemoryGuildStore, PersistenceHandle,
};
use crate::simulation::Simulation;
use log::{debug, error, info, warn};
use shared::{
    read_frame, write_frame, ClientEvent, CodecError, ErrorCode, ParticipantId, ServerEvent,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from network tasks to the simulation loop
#[derive(Debug)]
pub enum ServerMessage {
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
    },
    Event {
        client_id: ParticipantId,
        event: ClientEvent,
    },
    /// A frame arrived intact but did not decode; the stream is still usable.
    Malformed {
        client_id: ParticipantId,
        reason: String,
    },
    Closed {
        client_id: ParticipantId,
        reason: String,
    },
}

/// Main server coordinating connections and the authoritative simulation
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    clients: ClientManager,
    simulation: Simulation,
    readers: HashMap<ParticipantId, JoinHandle<()>>,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

fn open_store<S: GuildStore>(store: S) -> GameResult<(Vec<Guild>, PersistenceHandle)> {
    let guilds = store.load_all()?;
    let (handle, _writer) = spawn_writer(store);
    Ok((guilds, handle))
}

impl Server {
    /// Binds the listener, loads the map and the guild store, and builds the
    /// simulation. Must be called inside a tokio runtime.
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let spawns = config.spawn_points()?;
        let (guilds, persistence) = match &config.guild_file {
            Some(path) => {
                info!("Guilds persisted to {}", path.display());
                open_store(JsonFileGuildStore::new(path))?
            }
            None => open_store(MemoryGuildStore::new())?,
        };
        info!(
            "Loaded {} spawn points and {} guilds",
            spawns.len(),
            guilds.len()
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener: Some(listener),
            local_addr,
            clients: ClientManager::new(config.max_clients, config.client_timeout),
            simulation: Simulation::new(&config, &spawns, guilds, persistence),
            readers: HashMap::new(),
            tick_duration: config.tick_duration(),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the task that accepts connections and hands them to the loop
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if server_tx
                            .send(ServerMessage::Accepted { stream, addr })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn register(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", addr, e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let Some(client_id) = self.clients.add_client(addr, tx) else {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(reject_full(stream));
            return;
        };

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(write_loop(write_half, rx, client_id));
        let reader = tokio::spawn(read_loop(read_half, client_id, self.server_tx.clone()));
        self.readers.insert(client_id, reader);
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Accepted { stream, addr } => self.register(stream, addr),
            ServerMessage::Event { client_id, event } => {
                if self.clients.get(client_id).is_none() {
                    return;
                }
                self.clients.touch(client_id);

                let mut out = Outbox::new();
                self.simulation.handle_event(client_id, event, &mut out);
                let joined = self.simulation.world().contains(client_id);
                self.clients.mark_joined(client_id, joined);
                self.flush(&mut out);
            }
            ServerMessage::Malformed { client_id, reason } => {
                debug!("Malformed frame from {}: {}", client_id, reason);
                let mut out = Outbox::new();
                out.send(
                    client_id,
                    GameError::protocol(ErrorCode::InvalidPayload, reason).to_event(),
                );
                self.flush(&mut out);
            }
            ServerMessage::Closed { client_id, reason } => {
                debug!("Connection {} closed: {}", client_id, reason);
                self.drop_connection(client_id);
            }
        }
    }

    /// Removes the connection and runs the disconnect cascade.
    fn drop_connection(&mut self, client_id: ParticipantId) {
        if let Some(reader) = self.readers.remove(&client_id) {
            reader.abort();
        }
        if !self.clients.remove_client(client_id) {
            return;
        }

        let mut out = Outbox::new();
        self.simulation.disconnect(client_id, &mut out);
        self.flush(&mut out);
    }

    fn flush(&self, out: &mut Outbox) {
        for outgoing in out.drain() {
            self.clients.deliver(&outgoing);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timeout_interval = interval(TIMEOUT_CHECK_INTERVAL);
        let mut last_tick = Instant::now();
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt_ms = now.duration_since(last_tick).as_millis() as u64;
                    last_tick = now;

                    let mut out = Outbox::new();
                    self.simulation.tick(dt_ms, &mut out);
                    self.flush(&mut out);

                    ticks += 1;
                    if ticks % 200 == 0 && !self.clients.is_empty() {
                        debug!(
                            "Tick {}: {} connections, {} in world, {} monsters",
                            ticks,
                            self.clients.len(),
                            self.simulation.world().len(),
                            self.simulation.monsters().len()
                        );
                    }
                },

                _ = timeout_interval.tick() => {
                    for client_id in self.clients.check_timeouts() {
                        if let Some(reader) = self.readers.remove(&client_id) {
                            reader.abort();
                        }
                        let mut out = Outbox::new();
                        self.simulation.disconnect(client_id, &mut out);
                        self.flush(&mut out);
                    }
                },
            }
        }

        Ok(())
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    client_id: ParticipantId,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let message = match read_frame::<_, ClientEvent>(&mut reader).await {
            Ok(event) => ServerMessage::Event { client_id, event },
            Err(CodecError::Encoding(e)) => ServerMessage::Malformed {
                client_id,
                reason: e.to_string(),
            },
            Err(e) => {
                let _ = server_tx.send(ServerMessage::Closed {
                    client_id,
                    reason: e.to_string(),
                });
                break;
            }
        };
        if server_tx.send(message).is_err() {
            break;
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    client_id: ParticipantId,
) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &event).await {
            debug!("Failed to send {} to {}: {}", event.name(), client_id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn reject_full(mut stream: TcpStream) {
    let event = GameError::capacity(ErrorCode::ServerFull, "server is full").to_event();
    if let Err(e) = write_frame(&mut stream, &event).await {
        debug!("Failed to send rejection: {}", e);
    }
    let _ = stream.shutdown().await;
}
