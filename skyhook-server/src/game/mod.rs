//! Replicated Game State
//!
//! The session -> pose map and the events it emits.
//!
//! ## Module Structure
//!
//! - `state`: Session identity and the replicated player map
//! - `events`: Replication events and the sink trait

pub mod state;
pub mod events;

// Re-export key types
pub use state::{ReplicatedPlayers, SessionId};
pub use events::{ReplicationEvent, ReplicationKind, ReplicationSink};
