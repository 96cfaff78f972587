//! # Realm Client Library
//!
//! Client-side half of the realm protocol: a connection that survives drops,
//! a local mirror of the authoritative world, and a headless bot that can
//! drive a participant without a human at the keyboard.
//!
//! ## Architecture Overview
//!
//! The server is the only source of truth. The client keeps a mirror that is
//! rebuilt from every `sync:state` and patched by the deltas in between.
//!
//! ### Client-Side Prediction
//! Local movement is applied to the mirror the moment it is sent. The server
//! never echoes a participant's own `player:moved`, so deltas cannot snap the
//! local position back; only a full resync (or a respawn) does.
//!
//! ### Interpolation
//! Other participants and monsters glide toward their last reported position
//! every frame. Gaps too large to smooth (teleports, respawns) snap.
//!
//! ### Reconnection
//! A dropped stream is retried with exponential backoff and jitter. A fresh
//! `player:join` is sent on the new stream and its `sync:state` reply reseeds
//! the mirror.
//!
//! ## Module Organization
//!
//! ### Mirror Module (`mirror`)
//! - Local prediction and remote interpolation
//! - Party, guild, trade and match views kept current from notifications
//! - Chat history and the last error reported by the server
//!
//! ### Network Module (`network`)
//! - TCP connection with length-prefixed bincode frames
//! - Background reader task feeding an event queue
//! - Reconnect policy with backoff and jitter
//!
//! ### Bot Module (`bot`)
//! - Wandering, chasing and attacking the nearest monster
//! - Loot pickup and respawning
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::mirror::WorldMirror;
//! use client::network::Connection;
//! use shared::{ClientEvent, JobClass};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let join = ClientEvent::Join {
//!         name: "ayla".to_string(),
//!         job: JobClass::Mage,
//!         x: 100.0,
//!         y: 100.0,
//!     };
//!     let mut connection = Connection::connect("127.0.0.1:8080", join).await?;
//!     let mut mirror = WorldMirror::new();
//!
//!     // The first reply to a join is the full snapshot
//!     if let Some(event) = connection.recv().await {
//!         mirror.apply(&event);
//!     }
//!     println!("{} others online", mirror.remote_count());
//!
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod mirror;
pub mod network;
