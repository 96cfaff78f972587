//! # Realm Server Library
//!
//! This library provides the authoritative server for a shared persistent
//! world: participants walk a 2D map, fight monsters, trade items, form
//! parties and guilds, chat, and queue for small PvP matches. The server owns
//! the canonical state and pushes every change to the clients that need it.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All world state lives in one [`simulation::Simulation`]. Monster AI,
//! respawns, invite expiry and ground-item lifetimes advance on a fixed tick
//! as per-tick countdowns, never as free-running timers.
//!
//! ### Negotiation Protocols
//! Trades, party invites, guild invites and match rooms are small state
//! machines. Each validates before it mutates, so a rejected request leaves
//! no partial effect behind.
//!
//! ### State Broadcasting
//! Handlers push events into an [`broadcast::Outbox`] with an explicit
//! audience (one participant, a party, the whole world). The network layer
//! drains it and routes each event to the matching connections.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the simulation and processes client events and ticks
//! sequentially. Every handler runs to completion, so there is no locking
//! and no interleaving inside a mutation.
//!
//! ### TCP Framing
//! Each connection is a TCP stream carrying length-prefixed bincode frames.
//! A reader and a writer task per connection talk to the main loop over
//! unbounded channels.
//!
//! ### Fire-and-Forget Persistence
//! Guild rosters survive restarts. Changes are applied in memory first and
//! then queued to a background writer; storage failures are logged and
//! never roll back the in-memory state.
//!
//! ## Module Organization
//!
//! - `client_manager`: live connections, ids, idle timeouts, delivery
//! - `network`: TCP accept loop, per-connection tasks, the main loop
//! - `simulation`: event dispatch, tick, disconnect cascade
//! - `world`: participants, movement, experience, inventories
//! - `monster`, `combat`, `loot`: monster AI, damage resolution, drops
//! - `trade`, `party`, `guild`, `invite`: negotiation protocols
//! - `chat`, `matchmaking`: chat routing and the match lobby
//! - `persistence`, `config`, `error`, `broadcast`: supporting pieces
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Binds, loads the map and guilds, then runs until the process exits
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod chat;
pub mod client_manager;
pub mod combat;
pub mod config;
pub mod error;
pub mod guild;
pub mod invite;
pub mod loot;
pub mod matchmaking;
pub mod monster;
pub mod network;
pub mod party;
pub mod persistence;
pub mod simulation;
pub mod trade;
pub mod world;
