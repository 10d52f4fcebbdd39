//! WebSocket client for connecting to the sync server

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn, error};

use skyhook::network::protocol::{
    ClientMessage, ErrorCode, JoinRequest, JoinedInfo, PoseUpdate, ServerMessage,
};
use skyhook::{PlayerPose, SessionId};

use super::replica::{RemoteSessions, SessionObserver};

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Sentinel for "no ping answered yet"
const NO_RTT: u64 = u64::MAX;

/// How long `disconnect` waits for room in the outbound queue
const LEAVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:2567`
    pub url: String,
    /// How long to wait for the join to be accepted
    pub join_timeout: Duration,
    /// Outbound queue depth; updates beyond it are dropped
    pub outgoing_capacity: usize,
    /// Send poses as binary frames instead of JSON
    pub binary_pose_updates: bool,
    /// Ping the server after this long without sending anything. Keep it
    /// well below the server's idle timeout.
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}", skyhook::DEFAULT_PORT),
            join_timeout: Duration::from_secs(5),
            outgoing_capacity: 64,
            binary_pose_updates: false,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    /// Defaults, with the URL taken from `SKYHOOK_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SKYHOOK_URL") {
            config.url = url;
        }
        config
    }
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Join rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("Timed out waiting for join")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

/// Frames queued for the writer task
enum Outgoing {
    Message(ClientMessage),
    Pose(PoseUpdate),
    Close,
}

/// A live connection to one room.
///
/// Dropping the client leaves the room best-effort; call
/// [`SyncClient::disconnect`] to wait for the leave to be flushed.
pub struct SyncClient {
    session_id: SessionId,
    room: String,
    binary_pose_updates: bool,
    outgoing: mpsc::Sender<Outgoing>,
    remote: Arc<Mutex<RemoteSessions>>,
    /// Cleared on disconnect/drop; the reader stops delivering once false
    live: Arc<AtomicBool>,
    /// Cleared by the reader when the socket closes
    connected: Arc<AtomicBool>,
    last_rtt_ms: Arc<AtomicU64>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl SyncClient {
    /// Connect, join `room` and start delivering remote changes to `observer`.
    ///
    /// Sessions already in the room are reported as added before this returns.
    pub async fn connect<O>(config: &ClientConfig, room: &str, mut observer: O) -> Result<Self, ClientError>
    where
        O: SessionObserver + Send + 'static,
    {
        info!("Connecting to {}...", config.url);
        let (ws_stream, _) = connect_async(config.url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let join = ClientMessage::Join(JoinRequest { room: room.to_string() });
        write.send(Message::Text(join.to_json()?)).await?;

        let info = match timeout(config.join_timeout, Self::await_joined(&mut read)).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout),
        };

        info!("Joined {} as {} ({} players present)", info.room, info.session_id.short(), info.players.len());

        let (sessions, initial) = RemoteSessions::from_snapshot(info.session_id.clone(), &info.players);
        for event in &initial {
            event.dispatch(&mut observer);
        }

        let remote = Arc::new(Mutex::new(sessions));
        let live = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(true));
        let last_rtt_ms = Arc::new(AtomicU64::new(NO_RTT));

        let reader = tokio::spawn(Self::run_reader(
            read,
            observer,
            remote.clone(),
            live.clone(),
            connected.clone(),
            last_rtt_ms.clone(),
        ));

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Outgoing>(config.outgoing_capacity.max(1));

        // Writer loop - send queued frames until closed, pinging when idle
        let heartbeat = config.heartbeat_interval;
        let writer = tokio::spawn(async move {
            loop {
                let out = match timeout(heartbeat, outgoing_rx.recv()).await {
                    Ok(Some(out)) => out,
                    Ok(None) => break,
                    Err(_) => Outgoing::Message(ClientMessage::Ping { timestamp: now_millis() }),
                };
                let frame = match out {
                    Outgoing::Message(msg) => match msg.to_json() {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    },
                    Outgoing::Pose(update) => match update.to_bytes() {
                        Ok(bytes) => Message::Binary(bytes),
                        Err(e) => {
                            error!("Failed to encode pose: {}", e);
                            continue;
                        }
                    },
                    Outgoing::Close => break,
                };
                if let Err(e) = write.send(frame).await {
                    debug!("Failed to send frame: {}", e);
                    return;
                }
            }
            let _ = write.close().await;
            debug!("Writer loop ended");
        });

        Ok(Self {
            session_id: info.session_id,
            room: info.room,
            binary_pose_updates: config.binary_pose_updates,
            outgoing: outgoing_tx,
            remote,
            live,
            connected,
            last_rtt_ms,
            reader,
            writer: Some(writer),
        })
    }

    async fn await_joined(read: &mut WsRead) -> Result<JoinedInfo, ClientError> {
        while let Some(frame) = read.next().await {
            match frame? {
                Message::Text(text) => match ServerMessage::from_json(&text)? {
                    ServerMessage::Joined(info) => return Ok(info),
                    ServerMessage::Error(e) => {
                        return Err(ClientError::Rejected { code: e.code, message: e.message });
                    }
                    ServerMessage::Shutdown { .. } => return Err(ClientError::ConnectionClosed),
                    other => debug!("Ignoring {:?} before join", other),
                },
                Message::Close(_) => return Err(ClientError::ConnectionClosed),
                _ => {}
            }
        }
        Err(ClientError::ConnectionClosed)
    }

    async fn run_reader<O: SessionObserver>(
        mut read: WsRead,
        mut observer: O,
        remote: Arc<Mutex<RemoteSessions>>,
        live: Arc<AtomicBool>,
        connected: Arc<AtomicBool>,
        last_rtt_ms: Arc<AtomicU64>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::Pong { timestamp, .. }) => {
                        let rtt = now_millis().saturating_sub(timestamp);
                        last_rtt_ms.store(rtt, Ordering::Relaxed);
                        debug!("RTT {} ms", rtt);
                    }
                    Ok(ServerMessage::Shutdown { reason }) => {
                        info!("Server shutting down: {}", reason);
                        break;
                    }
                    Ok(server_msg) => {
                        if !Self::deliver(&server_msg, &mut observer, &remote, &live) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse server message: {} - {}", e, text);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Server closed connection");
                    break;
                }
                Err(e) => {
                    debug!("WebSocket read error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        connected.store(false, Ordering::Release);
        debug!("Reader task ended");
    }

    /// Apply one message and notify the observer. False once the client
    /// has been released.
    fn deliver<O: SessionObserver>(
        msg: &ServerMessage,
        observer: &mut O,
        remote: &Mutex<RemoteSessions>,
        live: &AtomicBool,
    ) -> bool {
        let Ok(mut sessions) = remote.lock() else {
            return false;
        };
        // Checked under the lock so release() can wait out an in-flight callback
        if !live.load(Ordering::Acquire) {
            return false;
        }
        if let Some(event) = sessions.apply(msg) {
            event.dispatch(observer);
        }
        true
    }

    /// Own identity in the room.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Queue a pose update. Returns false if it was dropped.
    pub fn send_pose_update(&self, pose: PlayerPose) -> bool {
        if !self.live.load(Ordering::Acquire) {
            return false;
        }

        let out = if self.binary_pose_updates {
            Outgoing::Pose(pose.into())
        } else {
            Outgoing::Message(ClientMessage::UpdatePosition(pose.into()))
        };

        match self.outgoing.try_send(out) {
            Ok(()) => true,
            Err(e) => {
                debug!("Pose update dropped: {}", e);
                false
            }
        }
    }

    /// Send a latency probe; the result shows up in [`SyncClient::last_rtt`].
    pub fn ping(&self) -> bool {
        self.outgoing
            .try_send(Outgoing::Message(ClientMessage::Ping { timestamp: now_millis() }))
            .is_ok()
    }

    /// Round-trip time of the most recent ping, if any completed.
    pub fn last_rtt(&self) -> Option<Duration> {
        match self.last_rtt_ms.load(Ordering::Relaxed) {
            NO_RTT => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Latest pose of every other session.
    pub fn remote_poses(&self) -> BTreeMap<SessionId, PlayerPose> {
        self.remote.lock().map(|r| r.poses()).unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.live.load(Ordering::Acquire) && self.connected.load(Ordering::Acquire)
    }

    /// Leave the room and close the socket, waiting briefly for the
    /// leave to reach the wire.
    pub async fn disconnect(mut self) {
        if self.stop_delivery() {
            // Wait for room behind any queued pose updates
            let queued = timeout(LEAVE_TIMEOUT, async {
                self.outgoing.send(Outgoing::Message(ClientMessage::Leave)).await.is_ok()
                    && self.outgoing.send(Outgoing::Close).await.is_ok()
            })
            .await;
            if !matches!(queued, Ok(true)) {
                debug!("Leave could not be queued");
            }
        }
        if let Some(writer) = self.writer.take() {
            if timeout(Duration::from_secs(1), writer).await.is_err() {
                debug!("Writer did not finish in time");
            }
        }
        self.reader.abort();
        info!("Disconnected from {}", self.room);
    }

    /// Stop observer delivery. True on the first call only.
    fn stop_delivery(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        // Wait for any callback the reader is running right now
        drop(self.remote.lock());
        true
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // Best effort; the writer closes the socket once this sender is gone
        if self.stop_delivery() {
            let _ = self.outgoing.try_send(Outgoing::Message(ClientMessage::Leave));
            let _ = self.outgoing.try_send(Outgoing::Close);
        }
        self.reader.abort();
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one client, admits it to an empty room and records every
    /// JSON message it sends until the socket closes.
    async fn recording_server() -> (ClientConfig, JoinHandle<Vec<ClientMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            url: format!("ws://{}", listener.local_addr().unwrap()),
            ..Default::default()
        };

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(frame)) = ws.next().await {
                let Message::Text(text) = frame else { continue };
                let msg = ClientMessage::from_json(&text).unwrap();
                if let ClientMessage::Join(req) = &msg {
                    let joined = ServerMessage::Joined(JoinedInfo {
                        session_id: SessionId::from("me"),
                        room: req.room.clone(),
                        players: Vec::new(),
                    });
                    ws.send(Message::Text(joined.to_json().unwrap())).await.unwrap();
                }
                received.push(msg);
            }
            received
        });

        (config, handle)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://127.0.0.1:2567");
        assert_eq!(config.join_timeout, Duration::from_secs(5));
        assert!(!config.binary_pose_updates);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_idle_client_sends_heartbeat() {
        let (config, server) = recording_server().await;
        let config = ClientConfig { heartbeat_interval: Duration::from_millis(50), ..config };

        let client = SyncClient::connect(&config, "game_room", ()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        client.disconnect().await;

        let received = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        let pings = received.iter().filter(|m| matches!(m, ClientMessage::Ping { .. })).count();
        assert!(pings >= 2, "expected heartbeats, got {:?}", received);
    }

    #[tokio::test]
    async fn test_disconnect_sends_leave_behind_full_queue() {
        let (config, server) = recording_server().await;
        let config = ClientConfig { outgoing_capacity: 1, ..config };

        let client = SyncClient::connect(&config, "game_room", ()).await.unwrap();
        for i in 0..200 {
            client.send_pose_update(PlayerPose::at(i as f32, 0.0, 0.0));
        }
        client.disconnect().await;

        let received = timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert!(matches!(received.last(), Some(ClientMessage::Leave)), "got {:?}", received.last());
    }

    #[test]
    fn test_deliver_stops_after_release() {
        let remote = Mutex::new(RemoteSessions::from_snapshot(SessionId::from("me"), &[]).0);
        let live = AtomicBool::new(true);
        let mut observer = crate::network::EventQueue::new();
        let msg = ServerMessage::PlayerAdded { session_id: SessionId::from("b"), pose: PlayerPose::SPAWN };

        assert!(SyncClient::deliver(&msg, &mut observer, &remote, &live));
        assert_eq!(observer.len(), 1);

        live.store(false, Ordering::Release);
        assert!(!SyncClient::deliver(&msg, &mut observer, &remote, &live));
        assert_eq!(observer.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ClientConfig { url: format!("ws://{}", addr), ..Default::default() };
        let result = SyncClient::connect(&config, "game_room", ()).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }
}
