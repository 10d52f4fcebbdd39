//! WebSocket Sync Server
//!
//! Async WebSocket server for multiplayer connections.
//! Handles room joins, pose updates and connection teardown.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::state::SessionId;
use crate::network::protocol::{
    ClientMessage, ServerMessage, ServerError, ErrorCode, JoinRequest, PoseUpdate,
};
use crate::network::room::{GameRoom, MemberSender, RoomConfig, RoomError, RoomManager, UpdateOutcome};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Drop a connection after this long without an inbound frame.
    pub idle_timeout: Duration,
    /// Configuration applied to every room.
    pub room: RoomConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:2567".parse().unwrap(),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(60),
            room: RoomConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// `SKYHOOK_BIND` takes a full socket address; otherwise `PORT` picks
    /// the port on all interfaces.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = std::env::var("SKYHOOK_BIND").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        } else if let Some(port) = std::env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
            config.bind_addr.set_port(port);
        }

        if let Some(max) = std::env::var("SKYHOOK_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()) {
            config.max_connections = max;
        }

        if let Some(secs) = std::env::var("SKYHOOK_IDLE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()) {
            config.idle_timeout = Duration::from_secs(secs);
        }

        config
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Room error.
    #[error("Room error: {0}")]
    Room(#[from] RoomError),
}

/// Connected client state.
struct ConnectedClient {
    /// Session identifier (after join).
    session_id: Option<SessionId>,
    /// Connection time.
    connected_at: Instant,
}

/// A connection's place in a room.
struct Membership {
    room_name: String,
    session_id: SessionId,
    room: Arc<RwLock<GameRoom>>,
}

/// Whether the connection loop keeps reading.
enum Flow {
    Continue,
    Close,
}

/// State shared by every connection task.
#[derive(Clone)]
struct Shared {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
}

/// The sync server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Room registry.
    rooms: Arc<RoomManager>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            rooms: Arc::new(RoomManager::new(config.room.clone())),
            config,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already-bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Sync server listening on {}", listener.local_addr()?);

        let cleanup_rooms = self.rooms.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_rooms).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Reserve the slot before the handshake so bursts
                            // cannot overshoot the limit
                            {
                                let mut clients = self.clients.write().await;
                                if clients.len() >= self.config.max_connections {
                                    warn!("Connection limit reached, rejecting {}", addr);
                                    continue;
                                }
                                clients.insert(addr, ConnectedClient {
                                    session_id: None,
                                    connected_at: Instant::now(),
                                });
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = Shared {
            config: self.config.clone(),
            rooms: self.rooms.clone(),
            clients: self.clients.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = Self::serve_connection(stream, addr, &shared, shutdown_rx).await {
                debug!("Connection {} ended with error: {}", addr, e);
            }
            shared.clients.write().await.remove(&addr);
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Drive one connection from handshake to teardown.
    async fn serve_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: &Shared,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), GameServerError> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = MemberSender::channel(shared.config.room.outbound_capacity);

        // Writer task: drains the outbound queue until every sender is gone
        let mut sender_task = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut membership: Option<Membership> = None;

        loop {
            tokio::select! {
                msg = timeout(shared.config.idle_timeout, ws_receiver.next()) => {
                    let flow = match msg {
                        Err(_) => {
                            info!("Client {} idle for {:?}, dropping", addr, shared.config.idle_timeout);
                            Flow::Close
                        }
                        Ok(Some(Ok(Message::Text(text)))) => {
                            match ClientMessage::from_json(&text) {
                                Ok(client_msg) => {
                                    Self::handle_client_message(addr, client_msg, shared, &mut membership, &msg_tx).await
                                }
                                Err(e) => {
                                    debug!("Invalid message from {}: {}", addr, e);
                                    Self::send_error(&msg_tx, ErrorCode::InvalidInput, "Invalid message format");
                                    Flow::Continue
                                }
                            }
                        }
                        Ok(Some(Ok(Message::Binary(data)))) => {
                            match PoseUpdate::from_bytes(&data) {
                                Ok(update) => {
                                    Self::handle_update(addr, update, &membership, &msg_tx).await;
                                }
                                Err(e) => {
                                    debug!("Invalid binary frame from {}: {}", addr, e);
                                    Self::send_error(&msg_tx, ErrorCode::InvalidInput, "Invalid pose frame");
                                }
                            }
                            Flow::Continue
                        }
                        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                            debug!("Client {} disconnected", addr);
                            Flow::Close
                        }
                        Ok(Some(Err(e))) => {
                            debug!("WebSocket error for {}: {}", addr, e);
                            Flow::Close
                        }
                        Ok(Some(Ok(_))) => Flow::Continue,
                    };

                    if let Flow::Close = flow {
                        break;
                    }
                }
                _ = msg_tx.evicted() => {
                    warn!("Client {} fell behind on replication, dropping", addr);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    let _ = msg_tx.try_send(ServerMessage::Shutdown {
                        reason: "Server shutting down".to_string(),
                    });
                    break;
                }
            }
        }

        // A dropped connection is an implicit leave
        if let Some(member) = membership.take() {
            Self::leave_room(member, &shared.rooms).await;
        }

        // Let the writer flush whatever is queued, then close
        drop(msg_tx);
        if timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
            debug!("Writer for {} did not finish in time", addr);
            sender_task.abort();
        }

        info!("Client {} disconnected", addr);
        Ok(())
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        shared: &Shared,
        membership: &mut Option<Membership>,
        sender: &MemberSender,
    ) -> Flow {
        match msg {
            ClientMessage::Join(req) => {
                Self::handle_join(addr, req, shared, membership, sender).await
            }
            ClientMessage::UpdatePosition(update) => {
                Self::handle_update(addr, update, membership, sender).await;
                Flow::Continue
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.try_send(ServerMessage::Pong {
                    timestamp,
                    server_time: std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                });
                Flow::Continue
            }
            ClientMessage::Leave => {
                if let Some(member) = membership.take() {
                    Self::leave_room(member, &shared.rooms).await;
                }
                Flow::Close
            }
        }
    }

    /// Handle a join request.
    async fn handle_join(
        addr: SocketAddr,
        req: JoinRequest,
        shared: &Shared,
        membership: &mut Option<Membership>,
        sender: &MemberSender,
    ) -> Flow {
        if membership.is_some() {
            Self::send_error(sender, ErrorCode::AlreadyJoined, "Already joined a room");
            return Flow::Continue;
        }

        match shared.rooms.join_or_create(&req.room, sender.clone()).await {
            Ok((room, session_id)) => {
                if let Some(client) = shared.clients.write().await.get_mut(&addr) {
                    client.session_id = Some(session_id.clone());
                }
                debug!("Client {} is session {}", addr, session_id);
                *membership = Some(Membership {
                    room_name: req.room,
                    session_id,
                    room,
                });
                Flow::Continue
            }
            Err(e) => {
                warn!("Join of {} by {} refused: {}", req.room, addr, e);
                let code = match e {
                    RoomError::RoomFull(_) => ErrorCode::RoomFull,
                    RoomError::Disposed => ErrorCode::RoomUnavailable,
                };
                Self::send_error(sender, code, e.to_string());
                Flow::Close
            }
        }
    }

    /// Apply a pose update on behalf of the connection's own session.
    async fn handle_update(
        addr: SocketAddr,
        update: PoseUpdate,
        membership: &Option<Membership>,
        sender: &MemberSender,
    ) {
        let Some(member) = membership else {
            debug!("Pose update from {} before join, dropped", addr);
            Self::send_error(sender, ErrorCode::NotInRoom, "Join a room before sending updates");
            return;
        };

        let outcome = member.room.write().await.update_position(&member.session_id, update.to_pose());
        if outcome == UpdateOutcome::Dropped {
            debug!("Pose update for departed session {} dropped", member.session_id.short());
        }
    }

    /// Remove a session from its room and schedule disposal if it emptied.
    async fn leave_room(member: Membership, rooms: &Arc<RoomManager>) {
        let now_empty = {
            let mut room = member.room.write().await;
            room.leave(&member.session_id);
            room.is_empty()
        };

        if now_empty {
            let rooms = rooms.clone();
            let grace = rooms.config().dispose_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if rooms.release_if_empty(&member.room_name).await {
                    debug!("Released idle room {}", member.room_name);
                }
            });
        }
    }

    fn send_error(sender: &MemberSender, code: ErrorCode, message: impl Into<String>) {
        let _ = sender.try_send(ServerMessage::Error(ServerError::new(code, message)));
    }

    /// Periodically dispose rooms left empty.
    async fn run_cleanup_loop(rooms: Arc<RoomManager>) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;
            let disposed = rooms.cleanup().await;
            if disposed > 0 {
                info!("Cleanup disposed {} empty rooms", disposed);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Room registry.
    pub fn rooms(&self) -> Arc<RoomManager> {
        self.rooms.clone()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get number of connections that have joined a room.
    pub async fn session_count(&self) -> usize {
        self.clients.read().await.values().filter(|c| c.session_id.is_some()).count()
    }

    /// Age of the oldest live connection.
    pub async fn oldest_connection_age(&self) -> Option<Duration> {
        self.clients.read().await.values().map(|c| c.connected_at.elapsed()).max()
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.room_count().await
    }
}
