//! Skyhook Bot - headless client
//!
//! Joins a room, flies a scripted orbit and logs what it sees of the
//! other players.
//!
//! Usage: `skyhook-bot [room]` (server URL from `SKYHOOK_URL`)

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skyhook_client::game::OrbitPath;
use skyhook_client::{
    ClientConfig, EventQueue, InterpolationConfig, PoseInterpolator, PosePublisher, RemoteEvent,
    SyncClient, DEFAULT_ROOM,
};

/// Render-loop rate
const FRAME_RATE_HZ: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let room = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ROOM.to_string());
    let config = ClientConfig::from_env();

    let events = EventQueue::new();
    let client = SyncClient::connect(&config, &room, events.clone()).await?;
    info!("Flying as {} in {}", client.session_id().short(), client.room());

    // Spread bots around the circle so several of them don't overlap
    let phase = rand::thread_rng().gen_range(0.0..std::f32::consts::TAU);
    let mut orbit = OrbitPath::new(6.0, skyhook::SPAWN_HEIGHT, 600, phase);
    let mut publisher = PosePublisher::default();
    let mut interpolator = PoseInterpolator::new(InterpolationConfig::default())?;

    let mut frame = tokio::time::interval(Duration::from_millis(1000 / FRAME_RATE_HZ));
    let mut report = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = frame.tick() => {
                publisher.publish(Instant::now(), &mut orbit, &client);
                interpolator.tick(&client.remote_poses());

                for event in events.drain() {
                    match event {
                        RemoteEvent::Added { session_id, pose } => {
                            info!("Player {} joined at {:?}", session_id.short(), pose);
                        }
                        RemoteEvent::Removed { session_id } => {
                            info!("Player {} left", session_id.short());
                        }
                        RemoteEvent::Changed { .. } => {}
                    }
                }

                if !client.is_connected() {
                    warn!("Lost connection to server");
                    break;
                }
            }
            _ = report.tick() => {
                client.ping();
                let rtt = client.last_rtt().map(|d| d.as_millis()).unwrap_or(0);
                info!("{} other players, rtt {} ms", interpolator.len(), rtt);
                for (id, smoothed) in interpolator.iter() {
                    info!("  {} at {}", id.short(), smoothed.position);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, leaving");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
