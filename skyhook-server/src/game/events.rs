//! Replication Events
//!
//! Events emitted by the replicated player map on every mutation.
//! A sink receives them synchronously, in the order they were applied.

use serde::{Serialize, Deserialize};

use crate::core::pose::PlayerPose;
use crate::game::state::SessionId;

/// Kind of mutation applied to the player map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationKind {
    /// A session was inserted.
    Add,
    /// A session's pose was overwritten.
    Change,
    /// A session was removed.
    Remove,
}

/// A single mutation of the player map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReplicationEvent {
    /// Session joined with its initial pose.
    Add {
        session_id: SessionId,
        pose: PlayerPose,
    },

    /// Session's pose changed.
    Change {
        session_id: SessionId,
        pose: PlayerPose,
    },

    /// Session left.
    Remove {
        session_id: SessionId,
    },
}

impl ReplicationEvent {
    /// Session this event is about.
    pub fn session_id(&self) -> &SessionId {
        match self {
            ReplicationEvent::Add { session_id, .. }
            | ReplicationEvent::Change { session_id, .. }
            | ReplicationEvent::Remove { session_id } => session_id,
        }
    }

    /// Kind of mutation.
    pub fn kind(&self) -> ReplicationKind {
        match self {
            ReplicationEvent::Add { .. } => ReplicationKind::Add,
            ReplicationEvent::Change { .. } => ReplicationKind::Change,
            ReplicationEvent::Remove { .. } => ReplicationKind::Remove,
        }
    }

    /// Pose carried by the event (None for removals).
    pub fn pose(&self) -> Option<&PlayerPose> {
        match self {
            ReplicationEvent::Add { pose, .. } | ReplicationEvent::Change { pose, .. } => Some(pose),
            ReplicationEvent::Remove { .. } => None,
        }
    }
}

/// Receiver of replication events.
///
/// Called while the owning room is locked, so implementations must not
/// block or await.
pub trait ReplicationSink {
    /// Handle one event.
    fn emit(&mut self, event: ReplicationEvent);
}

/// Recording sink, mostly useful for tests and tooling.
impl ReplicationSink for Vec<ReplicationEvent> {
    fn emit(&mut self, event: ReplicationEvent) {
        self.push(event);
    }
}

/// Discarding sink.
impl ReplicationSink for () {
    fn emit(&mut self, _event: ReplicationEvent) {}
}
