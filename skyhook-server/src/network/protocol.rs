//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Text frames carry JSON tagged by `type`; binary frames carry a
//! bincode-encoded [`PoseUpdate`] for the high-rate pose path.

use serde::{Serialize, Deserialize};

use crate::core::pose::PlayerPose;
use crate::game::events::ReplicationEvent;
use crate::game::state::SessionId;

/// Room joined when the client does not name one.
pub const DEFAULT_ROOM: &str = "game_room";

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or create) a room by name.
    Join(JoinRequest),

    /// Overwrite the sender's own pose.
    UpdatePosition(PoseUpdate),

    /// Ping for latency measurement.
    Ping { timestamp: u64 },

    /// Leave the room cleanly.
    Leave,
}

/// Join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Logical room name.
    #[serde(default = "default_room")]
    pub room: String,
}

impl Default for JoinRequest {
    fn default() -> Self {
        Self { room: default_room() }
    }
}

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

/// Pose update payload.
///
/// Carries no session identity: the server attributes it to the
/// connection it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseUpdate {
    /// World X.
    pub x: f32,
    /// World Y.
    pub y: f32,
    /// World Z.
    pub z: f32,
    /// Quaternion X.
    pub qx: f32,
    /// Quaternion Y.
    pub qy: f32,
    /// Quaternion Z.
    pub qz: f32,
    /// Quaternion W.
    pub qw: f32,
}

impl PoseUpdate {
    /// Convert to the stored pose.
    pub fn to_pose(&self) -> PlayerPose {
        PlayerPose::new([self.x, self.y, self.z], [self.qx, self.qy, self.qz, self.qw])
    }

    /// Encode as a binary frame payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode a binary frame payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl From<PlayerPose> for PoseUpdate {
    fn from(pose: PlayerPose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            z: pose.z,
            qx: pose.qx,
            qy: pose.qy,
            qz: pose.qz,
            qw: pose.qw,
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted; carries the full room state exactly once.
    Joined(JoinedInfo),

    /// Another session joined.
    PlayerAdded {
        session_id: SessionId,
        pose: PlayerPose,
    },

    /// Another session's pose changed.
    PlayerChanged {
        session_id: SessionId,
        pose: PlayerPose,
    },

    /// Another session left.
    PlayerRemoved { session_id: SessionId },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Join acceptance with the initial snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedInfo {
    /// Identity assigned to this connection.
    pub session_id: SessionId,
    /// Room that was joined.
    pub room: String,
    /// Every session in the room, the joiner included.
    pub players: Vec<PlayerEntry>,
}

/// One entry of a room snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    /// Session identity.
    pub session_id: SessionId,
    /// Current pose.
    pub pose: PlayerPose,
}

impl From<ReplicationEvent> for ServerMessage {
    fn from(event: ReplicationEvent) -> Self {
        match event {
            ReplicationEvent::Add { session_id, pose } => ServerMessage::PlayerAdded { session_id, pose },
            ReplicationEvent::Change { session_id, pose } => ServerMessage::PlayerChanged { session_id, pose },
            ReplicationEvent::Remove { session_id } => ServerMessage::PlayerRemoved { session_id },
        }
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Room is at its occupancy limit.
    RoomFull,
    /// Room was disposed while joining.
    RoomUnavailable,
    /// Connection already joined a room.
    AlreadyJoined,
    /// Message requires a joined room.
    NotInRoom,
    /// Malformed message.
    InvalidInput,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Session this message is about, for replication messages.
    pub fn subject(&self) -> Option<&SessionId> {
        match self {
            ServerMessage::PlayerAdded { session_id, .. }
            | ServerMessage::PlayerChanged { session_id, .. }
            | ServerMessage::PlayerRemoved { session_id } => Some(session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_position_wire_shape() {
        let json = r#"{"type":"update_position","x":5,"y":12,"z":0,"qx":0,"qy":0,"qz":0,"qw":1}"#;
        let parsed = ClientMessage::from_json(json).unwrap();

        if let ClientMessage::UpdatePosition(update) = parsed {
            assert_eq!(update.to_pose(), PlayerPose::at(5.0, 12.0, 0.0));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_update_position_ignores_smuggled_session_id() {
        // Unknown fields are ignored; identity always comes from the connection
        let json = r#"{"type":"update_position","session_id":"victim","x":1,"y":2,"z":3,"qx":0,"qy":0,"qz":0,"qw":1}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        assert!(matches!(parsed, ClientMessage::UpdatePosition(_)));
    }

    #[test]
    fn test_join_defaults_room_name() {
        let parsed = ClientMessage::from_json(r#"{"type":"join"}"#).unwrap();
        if let ClientMessage::Join(req) = parsed {
            assert_eq!(req.room, DEFAULT_ROOM);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_joined_json_roundtrip() {
        let msg = ServerMessage::Joined(JoinedInfo {
            session_id: SessionId::from("me"),
            room: DEFAULT_ROOM.to_string(),
            players: vec![
                PlayerEntry { session_id: SessionId::from("me"), pose: PlayerPose::SPAWN },
                PlayerEntry { session_id: SessionId::from("other"), pose: PlayerPose::at(1.0, 2.0, 3.0) },
            ],
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"joined""#));

        if let ServerMessage::Joined(info) = ServerMessage::from_json(&json).unwrap() {
            assert_eq!(info.session_id.as_str(), "me");
            assert_eq!(info.players.len(), 2);
            assert_eq!(info.players[1].pose, PlayerPose::at(1.0, 2.0, 3.0));
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_replication_event_conversion() {
        let id = SessionId::from("abc");
        let msg: ServerMessage = ReplicationEvent::Change { session_id: id.clone(), pose: PlayerPose::SPAWN }.into();
        assert!(matches!(msg, ServerMessage::PlayerChanged { .. }));
        assert_eq!(msg.subject(), Some(&id));

        let json = ServerMessage::from(ReplicationEvent::Remove { session_id: id }).to_json().unwrap();
        assert_eq!(json, r#"{"type":"player_removed","session_id":"abc"}"#);
    }

    #[test]
    fn test_binary_pose_update() {
        let update = PoseUpdate::from(PlayerPose::new([1.5, -2.0, 3.25], [0.0, 0.0, 0.7071, 0.7071]));
        let bytes = update.to_bytes().unwrap();
        assert_eq!(bytes.len(), 7 * 4);
        assert_eq!(PoseUpdate::from_bytes(&bytes).unwrap(), update);
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError::new(ErrorCode::RoomFull, "Room is full"));
        let json = msg.to_json().unwrap();
        assert!(json.contains("room_full"));
    }
}
