//! Client <-> server over loopback sockets

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use skyhook::network::protocol::{ErrorCode, JoinRequest};
use skyhook::{ClientMessage, GameServer, ServerConfig};
use skyhook_client::{
    ClientConfig, ClientError, EventQueue, PlayerPose, PosePublisher, RemoteEvent, SyncClient,
    DEFAULT_ROOM,
};

async fn start_server() -> (Arc<GameServer>, ClientConfig) {
    start_server_with(ServerConfig::default()).await
}

async fn start_server_with(mut config: ServerConfig) -> (Arc<GameServer>, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    config.room.dispose_grace = Duration::from_millis(50);

    let server = Arc::new(GameServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move { runner.serve(listener).await });

    let client_config = ClientConfig {
        url: format!("ws://{}", addr),
        ..Default::default()
    };
    (server, client_config)
}

/// Re-check a condition (which may `.await`) until it holds, for up to two seconds.
macro_rules! eventually {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..200 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reached, "condition not reached in time: {}", stringify!($cond));
    }};
}

async fn players_in_room(server: &GameServer) -> usize {
    match server.rooms().get_room(DEFAULT_ROOM).await {
        Some(room) => room.read().await.player_count(),
        None => 0,
    }
}

#[tokio::test]
async fn test_two_players_see_each_other() {
    let (server, config) = start_server().await;

    let a_events = EventQueue::new();
    let a = SyncClient::connect(&config, DEFAULT_ROOM, a_events.clone()).await.unwrap();
    assert!(a.remote_poses().is_empty());

    let b = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();
    assert_ne!(a.session_id(), b.session_id());

    // B's snapshot holds A at spawn; A hears about B
    assert_eq!(b.remote_poses().get(a.session_id()), Some(&PlayerPose::SPAWN));
    eventually!(a.remote_poses().contains_key(b.session_id()));
    assert_eq!(
        a_events.drain(),
        vec![RemoteEvent::Added { session_id: b.session_id().clone(), pose: PlayerPose::SPAWN }]
    );

    // B moves; A converges, B's own view of A is untouched
    let moved = PlayerPose::at(5.0, 12.0, 0.0);
    assert!(b.send_pose_update(moved));
    eventually!(a.remote_poses().get(b.session_id()) == Some(&moved));
    assert_eq!(b.remote_poses().get(a.session_id()), Some(&PlayerPose::SPAWN));
    assert!(!b.remote_poses().contains_key(b.session_id()));

    // B leaves
    let b_id = b.session_id().clone();
    b.disconnect().await;
    eventually!(a.remote_poses().is_empty());
    assert!(a_events
        .drain()
        .iter()
        .any(|e| matches!(e, RemoteEvent::Removed { session_id } if *session_id == b_id)));

    assert_eq!(players_in_room(&server).await, 1);
    a.disconnect().await;
    eventually!(server.room_count().await == 0);
}

#[tokio::test]
async fn test_binary_pose_updates() {
    let (_server, config) = start_server().await;
    let binary = ClientConfig { binary_pose_updates: true, ..config.clone() };

    let a = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();
    let b = SyncClient::connect(&binary, DEFAULT_ROOM, ()).await.unwrap();

    let pose = PlayerPose::new([1.0, 13.0, -2.0], [0.0, 0.7071068, 0.0, 0.7071068]);
    assert!(b.send_pose_update(pose));
    eventually!(a.remote_poses().get(b.session_id()) == Some(&pose));
}

#[tokio::test]
async fn test_twenty_first_client_rejected() {
    let (server, config) = start_server().await;

    let mut clients = Vec::new();
    for _ in 0..20 {
        clients.push(SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap());
    }

    match SyncClient::connect(&config, DEFAULT_ROOM, ()).await {
        Err(ClientError::Rejected { code, .. }) => assert_eq!(code, ErrorCode::RoomFull),
        Err(e) => panic!("Expected room_full, got {}", e),
        Ok(_) => panic!("21st client was admitted"),
    }
    assert_eq!(players_in_room(&server).await, 20);

    // A separate room is unaffected
    let other = SyncClient::connect(&config, "other_room", ()).await.unwrap();
    assert!(other.remote_poses().is_empty());
}

#[tokio::test]
async fn test_drop_leaves_room() {
    let (server, config) = start_server().await;
    let a = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();
    let b = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();

    drop(b);
    eventually!(a.remote_poses().is_empty());
    assert_eq!(players_in_room(&server).await, 1);
}

#[tokio::test]
async fn test_join_abandoned_before_reading_reply() {
    let (server, config) = start_server().await;
    let events = EventQueue::new();
    let a = SyncClient::connect(&config, DEFAULT_ROOM, events.clone()).await.unwrap();

    // Send the join, wait until the server has admitted it, then go away
    // without ever reading the reply
    let (mut ws, _) = connect_async(config.url.as_str()).await.unwrap();
    let join = ClientMessage::Join(JoinRequest::default());
    ws.send(Message::Text(join.to_json().unwrap())).await.unwrap();
    eventually!(players_in_room(&server).await == 2);
    drop(ws);

    eventually!(players_in_room(&server).await == 1);
    eventually!(a.remote_poses().is_empty());

    let seen = events.drain();
    assert_eq!(seen.len(), 2);
    assert!(matches!(seen[0], RemoteEvent::Added { .. }));
    assert!(matches!(&seen[1], RemoteEvent::Removed { session_id } if *session_id == *seen[0].session_id()));
}

#[tokio::test]
async fn test_stationary_player_stays_joined() {
    let server_config = ServerConfig { idle_timeout: Duration::from_millis(300), ..Default::default() };
    let (server, config) = start_server_with(server_config).await;
    let config = ClientConfig { heartbeat_interval: Duration::from_millis(100), ..config };

    let a = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();
    let b = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();

    // B's render loop keeps offering the same pose, so no update goes out
    let mut publisher = PosePublisher::default();
    let mut standing = PlayerPose::SPAWN;
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(1) {
        publisher.publish(Instant::now(), &mut standing, &b);
        tokio::time::sleep(Duration::from_millis(16)).await;
    }

    assert!(a.is_connected());
    assert!(b.is_connected());
    assert!(a.remote_poses().contains_key(b.session_id()));
    assert_eq!(players_in_room(&server).await, 2);
}

#[tokio::test]
async fn test_observer_silent_after_disconnect() {
    let (_server, config) = start_server().await;

    let events = EventQueue::new();
    let a = SyncClient::connect(&config, DEFAULT_ROOM, events.clone()).await.unwrap();
    a.disconnect().await;

    let b = SyncClient::connect(&config, DEFAULT_ROOM, ()).await.unwrap();
    b.send_pose_update(PlayerPose::at(3.0, 3.0, 3.0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(events.is_empty());
}
