//! # ws-room-manager
//!
//! A realtime chat connection manager: one persistent STOMP-over-WebSocket
//! connection, any number of room subscriptions multiplexed over it.
//!
//! ## Features
//!
//! - **Single connection** - concurrent `connect` calls share one attempt
//! - **Auto-reconnection** with a bounded number of attempts
//! - **Subscription restoration** - rooms re-attach after every reconnect
//! - **Replace-on-resubscribe** - at most one handler per room
//! - **Heart-beats** negotiated with the broker, silence ends the session
//! - **Malformed-frame tolerance** - non-JSON bodies arrive as system messages,
//!   unknown message types and extra fields are passed through as received
//! - **Metrics** for observability
//!
//! ## Example
//!
//! ```ignore
//! use ws_room_manager::{ChatManager, Identity, ManagerConfig};
//!
//! let manager = ChatManager::new(ManagerConfig::from_env()?);
//! manager.connect(Identity::new("42").with_nickname("dev")).await?;
//!
//! manager.subscribe_to_room("room-7", |message| {
//!     println!("{:?}", message);
//! });
//! manager.send_message("room-7", "42", "dev", "hello");
//! ```

mod config;
mod error;
mod frame;
mod health;
mod manager;
mod message;
mod metrics;
mod registry;
mod state;
mod stomp;
#[cfg(test)]
mod testing;
mod transport;

pub use config::{
    ConfigError, HeartbeatConfig, ManagerConfig, ManagerConfigBuilder, ReconnectConfig,
    DEFAULT_ENDPOINT, DEFAULT_MAX_FRAME_SIZE,
};
pub use error::{Error, ErrorKind};
pub use frame::{Command, Frame, FrameError};
pub use health::NegotiatedHeartbeat;
pub use manager::ChatManager;
pub use message::{
    room_topic, ChatBody, ChatMessage, FallbackMessage, Identity, Inbound, MessageId, MessageType,
    ReadReceipt, JOIN_DESTINATION, READ_DESTINATION, SEND_DESTINATION,
};
pub use metrics::{Metrics, MetricsSnapshot, RoomMetrics};
pub use registry::RoomHandler;
pub use state::{ConnectionState, ConnectionStatus, StatusReport};
pub use stomp::{StompConfig, StompSession, StompTransport};
pub use transport::{
    ConnectRequest, EventSink, SubscriptionId, Transport, TransportEvent, TransportSession,
};

/// Result type for ws-room-manager operations
pub type Result<T> = std::result::Result<T, Error>;
