//! # Skyhook Sync Server
//!
//! Room-based pose replication for small multiplayer sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SKYHOOK SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  └── pose.rs     - Player pose (position + rotation)         │
//! │                                                              │
//! │  game/           - Replicated state                          │
//! │  ├── state.rs    - Session ids and the player map            │
//! │  └── events.rs   - Add / change / remove events              │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── room.rs     - Rooms, membership, broadcast              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! Every mutation of a room happens under that room's lock, and the
//! resulting event is queued to each member before the lock is released.
//! Each member therefore observes one room's events in the order they
//! were applied, and never sees a change for a session before its add.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::pose::{PlayerPose, PoseError, SPAWN_HEIGHT};
pub use game::state::{ReplicatedPlayers, SessionId};
pub use game::events::{ReplicationEvent, ReplicationSink};
pub use network::protocol::{ClientMessage, ServerMessage, PoseUpdate, DEFAULT_ROOM};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port
pub const DEFAULT_PORT: u16 = 2567;

/// Default per-room occupancy limit
pub const MAX_CLIENTS_PER_ROOM: usize = 20;
