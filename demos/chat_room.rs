//! Example: joining a chat room and echoing what arrives
//!
//! Needs a STOMP broker exposing `/topic/room.*` and the `/app/chat.*`
//! destinations, e.g. a Spring WebSocket chat backend.
//!
//! Run with: CHAT_WS_URL=ws://localhost:8080/ws cargo run --example chat_room -- room-7

use tokio::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws_room_manager::{ChatManager, Identity, Inbound};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let room_id = std::env::args().nth(1).unwrap_or_else(|| "lobby".to_string());
    let user_id = std::env::var("CHAT_USER_ID").unwrap_or_else(|_| "42".to_string());
    let nickname = std::env::var("CHAT_NICKNAME").unwrap_or_else(|_| "demo".to_string());

    let manager = ChatManager::from_env()?;
    info!(
        "Connecting to {} as {} ({})",
        manager.config().endpoint,
        nickname,
        user_id
    );

    // Registered before connecting; attaches once the session is up
    manager.subscribe_to_room(&room_id, |message| match message {
        Inbound::Parsed { message, .. } => info!("<< {:?}", message),
        Inbound::Unrecognized(frame) => info!("<< {}", frame),
        Inbound::Fallback(raw) => warn!("<< undecodable frame: {}", raw.content),
    });

    manager.connect(Identity::new(&user_id).with_nickname(&nickname)).await?;
    info!("Status: {:?}", manager.get_connection_status());

    manager.join_room(&room_id, &user_id, &nickname);
    manager.send_message(&room_id, &user_id, &nickname, "hello from ws-room-manager");

    let mut status = manager.watch_status();
    let watcher = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!("Connection is now {}", current);
        }
    });

    info!("Running... Press Ctrl+C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
    }

    let snapshot = manager.metrics().snapshot();
    info!("Final metrics:");
    info!("  Connections: {}", snapshot.connections_total);
    info!("  Reconnections: {}", snapshot.reconnections_total);
    info!("  Messages received: {}", snapshot.messages_received_total);
    info!("  Messages sent: {}", snapshot.messages_sent_total);

    manager.disconnect();
    watcher.abort();
    info!("Disconnected");

    Ok(())
}
