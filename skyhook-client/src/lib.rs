//! Skyhook client library
//!
//! Connects to a Skyhook sync server, publishes the local player's pose and
//! keeps a smoothed view of every other player in the room.

pub mod game;
pub mod network;

pub use game::{PoseInterpolator, InterpolationConfig, PosePublisher, PoseSource, SmoothedPose};
pub use network::{ClientConfig, ClientError, EventQueue, RemoteEvent, RemoteSessions, SessionObserver, SyncClient};

pub use skyhook::{PlayerPose, SessionId, DEFAULT_ROOM};
