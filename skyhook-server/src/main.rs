//! Skyhook Sync Server
//!
//! Accepts WebSocket clients, places them in rooms and relays poses.

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skyhook::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();

    info!("Skyhook Server v{}", VERSION);
    info!("Room capacity: {} clients", config.room.max_clients);
    info!("Idle timeout: {:?}", config.idle_timeout);

    let server = std::sync::Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_server.shutdown();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await?;

    info!("Server stopped");
    Ok(())
}
