//! Replicated Player State
//!
//! The authoritative session -> pose map of a room.
//! Every mutation is reported to a [`ReplicationSink`] passed in at
//! construction, so replication never depends on dirty-tracking.
//! Uses BTreeMap so snapshots come out in a stable order.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::pose::PlayerPose;
use crate::game::events::{ReplicationEvent, ReplicationSink};

// =============================================================================
// SESSION ID
// =============================================================================

/// Identity of one connection, assigned by the server at join time.
///
/// Opaque to clients. Never reused: a reconnecting client gets a new one.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

// =============================================================================
// REPLICATED PLAYERS
// =============================================================================

/// Session -> pose map that reports every mutation to its sink.
pub struct ReplicatedPlayers<S: ReplicationSink> {
    players: BTreeMap<SessionId, PlayerPose>,
    sink: S,
}

impl<S: ReplicationSink> ReplicatedPlayers<S> {
    /// Create an empty map reporting to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            players: BTreeMap::new(),
            sink,
        }
    }

    /// Insert a new session.
    ///
    /// Returns false (and emits nothing) if the session already exists.
    pub fn insert(&mut self, session_id: SessionId, pose: PlayerPose) -> bool {
        if self.players.contains_key(&session_id) {
            return false;
        }
        self.players.insert(session_id.clone(), pose);
        self.sink.emit(ReplicationEvent::Add { session_id, pose });
        true
    }

    /// Overwrite an existing session's pose.
    ///
    /// Returns false (and emits nothing) if the session is unknown; the
    /// session is never recreated.
    pub fn update(&mut self, session_id: &SessionId, pose: PlayerPose) -> bool {
        match self.players.get_mut(session_id) {
            Some(current) => {
                *current = pose;
                self.sink.emit(ReplicationEvent::Change {
                    session_id: session_id.clone(),
                    pose,
                });
                true
            }
            None => false,
        }
    }

    /// Remove a session, returning its last pose.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<PlayerPose> {
        let pose = self.players.remove(session_id)?;
        self.sink.emit(ReplicationEvent::Remove {
            session_id: session_id.clone(),
        });
        Some(pose)
    }

    /// Drop every session without emitting events (room teardown).
    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Get a session's pose.
    pub fn get(&self, session_id: &SessionId) -> Option<&PlayerPose> {
        self.players.get(session_id)
    }

    /// Check if a session is present.
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.players.contains_key(session_id)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True if no sessions are present.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Iterate sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &PlayerPose)> {
        self.players.iter()
    }

    /// Full copy of the map, in id order.
    pub fn snapshot(&self) -> Vec<(SessionId, PlayerPose)> {
        self.players.iter().map(|(id, pose)| (id.clone(), *pose)).collect()
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: ReplicationSink + Default> Default for ReplicatedPlayers<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}
