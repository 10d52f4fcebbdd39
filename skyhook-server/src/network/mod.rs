//! Network Layer
//!
//! WebSocket server, wire protocol and room management.
//! All shared state lives behind per-room locks; see `room`.

pub mod protocol;
pub mod room;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, JoinRequest, JoinedInfo, PlayerEntry,
    PoseUpdate, ServerError, ErrorCode, DEFAULT_ROOM,
};
pub use room::{GameRoom, RoomConfig, RoomError, RoomManager, RoomState, UpdateOutcome};
pub use server::{GameServer, ServerConfig, GameServerError};
