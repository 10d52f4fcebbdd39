//! Local replica of the room, and the observer hooks fed from it

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use skyhook::network::protocol::{PlayerEntry, ServerMessage};
use skyhook::{PlayerPose, SessionId};

// ============================================================================
// EVENTS
// ============================================================================

/// Change to another session, as seen by this client.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Added { session_id: SessionId, pose: PlayerPose },
    Changed { session_id: SessionId, pose: PlayerPose },
    Removed { session_id: SessionId },
}

impl RemoteEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            RemoteEvent::Added { session_id, .. }
            | RemoteEvent::Changed { session_id, .. }
            | RemoteEvent::Removed { session_id } => session_id,
        }
    }

    /// Invoke the matching observer callback.
    pub fn dispatch<O: SessionObserver + ?Sized>(&self, observer: &mut O) {
        match self {
            RemoteEvent::Added { session_id, pose } => observer.on_session_added(session_id, pose),
            RemoteEvent::Changed { session_id, pose } => observer.on_session_changed(session_id, pose),
            RemoteEvent::Removed { session_id } => observer.on_session_removed(session_id),
        }
    }
}

/// Callbacks for other sessions joining, moving and leaving.
///
/// Runs on the connection's reader task. Implementations must return
/// quickly and never block; hand work off to a queue instead.
pub trait SessionObserver {
    fn on_session_added(&mut self, _session_id: &SessionId, _pose: &PlayerPose) {}
    fn on_session_changed(&mut self, _session_id: &SessionId, _pose: &PlayerPose) {}
    fn on_session_removed(&mut self, _session_id: &SessionId) {}
}

/// No-op observer.
impl SessionObserver for () {}

/// Observer that queues events for a render loop to drain.
///
/// Clones share the same queue.
#[derive(Clone, Default)]
pub struct EventQueue {
    queue: Arc<Mutex<VecDeque<RemoteEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<RemoteEvent> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, event: RemoteEvent) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(event);
        }
    }
}

impl SessionObserver for EventQueue {
    fn on_session_added(&mut self, session_id: &SessionId, pose: &PlayerPose) {
        self.push(RemoteEvent::Added { session_id: session_id.clone(), pose: *pose });
    }

    fn on_session_changed(&mut self, session_id: &SessionId, pose: &PlayerPose) {
        self.push(RemoteEvent::Changed { session_id: session_id.clone(), pose: *pose });
    }

    fn on_session_removed(&mut self, session_id: &SessionId) {
        self.push(RemoteEvent::Removed { session_id: session_id.clone() });
    }
}

// ============================================================================
// REMOTE SESSIONS
// ============================================================================

/// Latest known pose of every other session in the room.
///
/// Built from the join snapshot, then kept current by replication messages.
/// The local session is never stored.
#[derive(Debug, Clone)]
pub struct RemoteSessions {
    own_id: SessionId,
    poses: BTreeMap<SessionId, PlayerPose>,
}

impl RemoteSessions {
    /// Seed from a join snapshot, returning the initial `Added` events.
    pub fn from_snapshot(own_id: SessionId, players: &[PlayerEntry]) -> (Self, Vec<RemoteEvent>) {
        let mut sessions = Self {
            own_id,
            poses: BTreeMap::new(),
        };

        let events = players
            .iter()
            .filter_map(|entry| sessions.add(entry.session_id.clone(), entry.pose))
            .collect();

        (sessions, events)
    }

    /// Apply one server message. Returns the resulting event, if any.
    pub fn apply(&mut self, msg: &ServerMessage) -> Option<RemoteEvent> {
        match msg {
            ServerMessage::PlayerAdded { session_id, pose } => self.add(session_id.clone(), *pose),
            ServerMessage::PlayerChanged { session_id, pose } => {
                if *session_id == self.own_id {
                    return None;
                }
                match self.poses.insert(session_id.clone(), *pose) {
                    Some(_) => Some(RemoteEvent::Changed { session_id: session_id.clone(), pose: *pose }),
                    // First sighting; observers always see an add first
                    None => Some(RemoteEvent::Added { session_id: session_id.clone(), pose: *pose }),
                }
            }
            ServerMessage::PlayerRemoved { session_id } => {
                self.poses.remove(session_id)?;
                Some(RemoteEvent::Removed { session_id: session_id.clone() })
            }
            ServerMessage::Error(e) => {
                warn!("Server error {:?}: {}", e.code, e.message);
                None
            }
            other => {
                debug!("Ignoring {:?}", other);
                None
            }
        }
    }

    fn add(&mut self, session_id: SessionId, pose: PlayerPose) -> Option<RemoteEvent> {
        if session_id == self.own_id {
            return None;
        }
        self.poses.insert(session_id.clone(), pose);
        Some(RemoteEvent::Added { session_id, pose })
    }

    pub fn own_id(&self) -> &SessionId {
        &self.own_id
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&PlayerPose> {
        self.poses.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Copy of the current map.
    pub fn poses(&self) -> BTreeMap<SessionId, PlayerPose> {
        self.poses.clone()
    }
}
