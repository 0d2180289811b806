use crate::config::ConfigError;
use crate::frame::FrameError;
use thiserror::Error;

/// Categorizes errors for status reporting.
///
/// This is a lightweight, cloneable representation of the error type
/// that consumers can match on without holding the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// WebSocket protocol error
    WebSocket,
    /// Connection failed (timeout, refused, retries exhausted)
    ConnectionFailed,
    /// Broker replied with an ERROR frame or broke the STOMP protocol
    Protocol,
    /// Peer stopped sending heart-beats
    HeartbeatTimeout,
    /// Manager was torn down
    ShuttingDown,
    /// Other error
    Other,
}

/// Errors that can occur in ws-room-manager
#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection failed after all retry attempts
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    ConnectionFailed { attempts: u32, last_error: String },

    /// STOMP-level failure reported by the broker
    #[error("STOMP protocol error: {0}")]
    Protocol(String),

    /// Malformed STOMP frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// No frame or heart-beat within the negotiated window
    #[error("Heart-beat timeout: nothing received for {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    /// Manager is shutting down
    #[error("Manager is shutting down")]
    ShuttingDown,

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Get the kind of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_) => ErrorKind::WebSocket,
            Error::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Error::Protocol(_) | Error::Frame(_) => ErrorKind::Protocol,
            Error::HeartbeatTimeout(_) => ErrorKind::HeartbeatTimeout,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
            Error::ChannelSend(_) | Error::Config(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::ShuttingDown.kind(), ErrorKind::ShuttingDown);
        assert_eq!(
            Error::from(ConfigError::InvalidTimeout("zero".into())).kind(),
            ErrorKind::Other
        );
        assert_eq!(Error::Protocol("bad".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::Frame(FrameError::MissingTerminator).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            Error::ConnectionFailed {
                attempts: 5,
                last_error: "refused".into()
            }
            .kind(),
            ErrorKind::ConnectionFailed
        );
    }

    #[test]
    fn test_connection_failed_message() {
        let err = Error::ConnectionFailed {
            attempts: 3,
            last_error: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection failed after 3 attempts: connection refused"
        );
    }
}
