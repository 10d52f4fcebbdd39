//! Core primitives.
//!
//! Plain data shared by the server, the wire protocol and clients.

pub mod pose;

pub use pose::{PlayerPose, PoseError, SPAWN_HEIGHT};
