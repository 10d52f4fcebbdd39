//! Room Management
//!
//! A room owns the authoritative session -> pose map for one world
//! instance and fans every mutation out to its members.
//! Rooms are created lazily on first join and disposed once empty.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::core::pose::{PlayerPose, PoseError};
use crate::game::events::{ReplicationEvent, ReplicationSink};
use crate::game::state::{ReplicatedPlayers, SessionId};
use crate::network::protocol::{JoinedInfo, PlayerEntry, ServerMessage};

/// Outbound message queue of one connection, plus the signal raised
/// when the room drops it for falling behind.
#[derive(Clone)]
pub struct MemberSender {
    queue: mpsc::Sender<ServerMessage>,
    evicted: Arc<Notify>,
}

impl MemberSender {
    /// Bounded queue holding up to `capacity` messages, and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (Self { queue, evicted: Arc::new(Notify::new()) }, rx)
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.queue.try_send(msg)
    }

    /// Resolves once the member has been evicted from its room.
    pub async fn evicted(&self) {
        self.evicted.notified().await
    }

    fn evict(&self) {
        self.evicted.notify_one();
    }
}

/// Room state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Accepting joins.
    Open,
    /// Resources released; no further joins.
    Disposed,
}

/// Configuration for a room.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Maximum concurrent sessions.
    pub max_clients: usize,
    /// How long an empty room lingers before it is disposed.
    pub dispose_grace: Duration,
    /// Outbound queue depth per member. A member whose queue overflows
    /// is evicted.
    pub outbound_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_clients: crate::MAX_CLIENTS_PER_ROOM,
            dispose_grace: Duration::from_secs(5),
            outbound_capacity: 256,
        }
    }
}

/// Room errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// Room is at its occupancy limit.
    #[error("Room is full ({0} clients)")]
    RoomFull(usize),

    /// Room was disposed.
    #[error("Room has been disposed")]
    Disposed,
}

/// Result of applying a pose update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Pose stored and replicated.
    Applied,
    /// Session no longer in the room; update ignored.
    Dropped,
    /// Pose failed validation; update ignored.
    Rejected(PoseError),
}

// =============================================================================
// BROADCASTER
// =============================================================================

/// Replication sink that forwards each event to every member except the
/// session the event is about.
///
/// Events are never dropped for a member that stays registered: a member
/// whose queue is full is marked lagging and the room evicts it.
#[derive(Default)]
pub struct Broadcaster {
    members: BTreeMap<SessionId, MemberSender>,
    lagging: Vec<SessionId>,
}

impl Broadcaster {
    /// Register a member's outbound queue.
    pub fn register(&mut self, session_id: SessionId, sender: MemberSender) {
        self.members.insert(session_id, sender);
    }

    /// Unregister a member. Returns true if it was present.
    pub fn unregister(&mut self, session_id: &SessionId) -> bool {
        self.members.remove(session_id).is_some()
    }

    /// Number of registered members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn take_lagging(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.lagging)
    }

    fn clear(&mut self) {
        self.members.clear();
        self.lagging.clear();
    }
}

impl ReplicationSink for Broadcaster {
    fn emit(&mut self, event: ReplicationEvent) {
        let subject = event.session_id().clone();
        let kind = event.kind();
        let message = ServerMessage::from(event);

        let mut delivered = 0usize;
        for (member, sender) in &self.members {
            if *member == subject {
                continue;
            }
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    if !self.lagging.contains(member) {
                        self.lagging.push(member.clone());
                    }
                }
                // Member is mid-disconnect; its own cleanup removes it
                Err(TrySendError::Closed(_)) => {}
            }
        }

        debug!("Replicated {:?} for {} to {} members", kind, subject.short(), delivered);
    }
}

// =============================================================================
// GAME ROOM
// =============================================================================

/// One world instance.
pub struct GameRoom {
    /// Room name.
    pub name: String,
    /// Current state.
    pub state: RoomState,
    /// Room configuration.
    pub config: RoomConfig,
    /// Authoritative poses, replicated through the broadcaster.
    players: ReplicatedPlayers<Broadcaster>,
    /// When the room was created.
    created_at: Instant,
}

impl GameRoom {
    /// Create a new room.
    pub fn new(name: impl Into<String>, config: RoomConfig) -> Self {
        Self {
            name: name.into(),
            state: RoomState::Open,
            config,
            players: ReplicatedPlayers::new(Broadcaster::default()),
            created_at: Instant::now(),
        }
    }

    /// Admit a new connection.
    ///
    /// The joiner receives the full snapshot on `sender` before it is
    /// registered for incremental events; existing members receive an add.
    pub fn join(&mut self, sender: MemberSender) -> Result<SessionId, RoomError> {
        if self.state == RoomState::Disposed {
            return Err(RoomError::Disposed);
        }

        if self.players.len() >= self.config.max_clients {
            return Err(RoomError::RoomFull(self.config.max_clients));
        }

        let mut session_id = SessionId::generate();
        while self.players.contains(&session_id) {
            session_id = SessionId::generate();
        }

        self.players.insert(session_id.clone(), PlayerPose::SPAWN);

        let snapshot = ServerMessage::Joined(JoinedInfo {
            session_id: session_id.clone(),
            room: self.name.clone(),
            players: self.snapshot(),
        });
        if sender.try_send(snapshot).is_err() {
            // Connection went away mid-join; undo so no pose is orphaned
            self.players.remove(&session_id);
            self.evict_lagging();
            return Err(RoomError::Disposed);
        }

        self.players.sink_mut().register(session_id.clone(), sender);
        self.evict_lagging();

        info!("{} joined {} ({}/{})", session_id.short(), self.name, self.players.len(), self.config.max_clients);
        Ok(session_id)
    }

    /// Overwrite the pose of `session_id` with data from its own connection.
    pub fn update_position(&mut self, session_id: &SessionId, pose: PlayerPose) -> UpdateOutcome {
        if let Err(e) = pose.validate() {
            warn!("Rejected pose from {}: {}", session_id.short(), e);
            return UpdateOutcome::Rejected(e);
        }

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("{} -> {:?}", session_id.short(), pose);

        if !self.players.update(session_id, pose) {
            return UpdateOutcome::Dropped;
        }
        self.evict_lagging();
        UpdateOutcome::Applied
    }

    /// Remove a session. Returns true if it was present.
    pub fn leave(&mut self, session_id: &SessionId) -> bool {
        let removed = self.remove_session(session_id);
        self.evict_lagging();
        removed
    }

    fn remove_session(&mut self, session_id: &SessionId) -> bool {
        self.players.sink_mut().unregister(session_id);
        if self.players.remove(session_id).is_some() {
            info!("{} left {} ({} remaining)", session_id.short(), self.name, self.players.len());
            true
        } else {
            false
        }
    }

    /// Remove every member whose outbound queue overflowed and signal its
    /// connection. Each removal is replicated, which can overflow more queues.
    fn evict_lagging(&mut self) {
        loop {
            let lagging = self.players.sink_mut().take_lagging();
            if lagging.is_empty() {
                return;
            }
            for session_id in lagging {
                if let Some(sender) = self.players.sink().members.get(&session_id) {
                    sender.evict();
                }
                warn!("{} fell behind in {}, evicting", session_id.short(), self.name);
                self.remove_session(&session_id);
            }
        }
    }

    /// Release all per-room resources.
    pub fn dispose(&mut self) {
        if self.state == RoomState::Disposed {
            return;
        }
        self.players.clear();
        self.players.sink_mut().clear();
        self.state = RoomState::Disposed;
        info!("Room {} disposed after {:?}", self.name, self.created_at.elapsed());
    }

    /// Get a session's pose.
    pub fn pose(&self, session_id: &SessionId) -> Option<PlayerPose> {
        self.players.get(session_id).copied()
    }

    /// Full room state, in session order.
    pub fn snapshot(&self) -> Vec<PlayerEntry> {
        self.players
            .iter()
            .map(|(id, pose)| PlayerEntry { session_id: id.clone(), pose: *pose })
            .collect()
    }

    /// Get player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Check if the room has no sessions.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Check if the room is at capacity.
    pub fn is_full(&self) -> bool {
        self.players.len() >= self.config.max_clients
    }

    /// Check if the room was disposed.
    pub fn is_disposed(&self) -> bool {
        self.state == RoomState::Disposed
    }
}

// =============================================================================
// ROOM MANAGER
// =============================================================================

/// Manages all live rooms, keyed by name.
///
/// Lock order: the registry lock is always taken before a room lock.
pub struct RoomManager {
    config: RoomConfig,
    rooms: RwLock<BTreeMap<String, Arc<RwLock<GameRoom>>>>,
}

impl RoomManager {
    /// Create a new room manager.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Room configuration applied to new rooms.
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Join `name`, creating the room if it does not exist.
    pub async fn join_or_create(
        &self,
        name: &str,
        sender: MemberSender,
    ) -> Result<(Arc<RwLock<GameRoom>>, SessionId), RoomError> {
        let mut rooms = self.rooms.write().await;

        let stale = match rooms.get(name) {
            Some(room) => room.read().await.is_disposed(),
            None => true,
        };
        if stale {
            debug!("Creating room {}", name);
            rooms.insert(name.to_string(), Arc::new(RwLock::new(GameRoom::new(name, self.config.clone()))));
        }

        let room = rooms.get(name).cloned().ok_or(RoomError::Disposed)?;
        let joined = room.write().await.join(sender);
        match joined {
            Ok(session_id) => Ok((room, session_id)),
            Err(e) => {
                if stale {
                    // Never leave a freshly created room registered while empty
                    room.write().await.dispose();
                    rooms.remove(name);
                }
                Err(e)
            }
        }
    }

    /// Get a room by name.
    pub async fn get_room(&self, name: &str) -> Option<Arc<RwLock<GameRoom>>> {
        let rooms = self.rooms.read().await;
        rooms.get(name).cloned()
    }

    /// Dispose and unregister `name` if it has no sessions.
    ///
    /// Returns true if the room was disposed.
    pub async fn release_if_empty(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(name).cloned() else {
            return false;
        };

        let mut room = room.write().await;
        if !room.is_empty() {
            return false;
        }
        room.dispose();
        rooms.remove(name);
        true
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Dispose every empty room. Returns how many were disposed.
    pub async fn cleanup(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut to_remove = Vec::new();

        for (name, room) in rooms.iter() {
            let mut room = room.write().await;
            if room.is_empty() {
                room.dispose();
                to_remove.push(name.clone());
            }
        }

        for name in &to_remove {
            rooms.remove(name);
        }
        to_remove.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
