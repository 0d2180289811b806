//! Connection state machine.

use std::fmt;
use tracing::{debug, warn};

/// Lifecycle status of the manager's single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; needs an explicit `connect`
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Teardown to `Disconnected` is always allowed.
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Failed, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Disconnected, Failed)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of the connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Cleared on successful connect
    pub last_error: Option<String>,
    /// Attempts since the last successful connect
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    /// Apply a transition, rejecting illegal ones.
    ///
    /// Entering `Connected` resets the attempt counter and clears the last
    /// error. Returns whether the status changed.
    pub(crate) fn transition(&mut self, next: ConnectionStatus) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            warn!("Rejected connection transition {} -> {}", self.status, next);
            return false;
        }
        debug!("Connection transition {} -> {}", self.status, next);
        self.status = next;
        if next == ConnectionStatus::Connected {
            self.reconnect_attempts = 0;
            self.last_error = None;
        }
        true
    }

    /// Return to the initial state
    pub(crate) fn reset(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.last_error = None;
        self.reconnect_attempts = 0;
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            is_connected: self.status.is_connected(),
            error: self.last_error.clone(),
        }
    }
}

/// What `get_connection_status` returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub is_connected: bool,
    pub error: Option<String>,
}
