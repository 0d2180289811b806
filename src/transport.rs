//! The seam between the manager and the wire.
//!
//! The manager owns reconnection; a [`Transport`] only opens one session per
//! call to [`Transport::open`] and reports what happens to it through an
//! [`EventSink`].

use crate::error::Error;
use std::fmt;
use tokio::sync::mpsc;

/// Transport-level subscription id (the STOMP `id` header)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub(crate) fn from_sequence(n: u64) -> Self {
        SubscriptionId(format!("sub-{}", n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        SubscriptionId(id.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Extra connection-establishment headers (identity)
    pub headers: Vec<(String, String)>,
}

/// Something that happened to an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Session established; subscriptions may be attached
    Connected,
    /// Inbound frame for a live subscription
    Frame {
        subscription: SubscriptionId,
        destination: String,
        body: String,
    },
    /// Broker reported an error; the session is unusable
    ProtocolError(String),
    /// Session ended, gracefully or not
    Closed { reason: Option<String> },
}

/// Where a session reports its events.
///
/// Each sink is stamped with the generation of the session it belongs to so
/// the manager can ignore events from sessions it has already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns `false` once nobody is listening
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Opens sessions to a publish/subscribe broker
pub trait Transport: Send + Sync + 'static {
    type Session: TransportSession;

    /// Start opening a session. Must not block; progress is reported on `events`.
    fn open(&self, request: ConnectRequest, events: EventSink) -> Self::Session;
}

/// Handle to one open (or opening) session.
///
/// All methods hand work off to the session and return immediately.
pub trait TransportSession: Send + Sync + 'static {
    fn subscribe(&self, id: &SubscriptionId, destination: &str) -> Result<(), Error>;

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), Error>;

    fn publish(&self, destination: &str, body: &str) -> Result<(), Error>;

    /// Close gracefully; no further events are required after this
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_ids_are_sequenced() {
        assert_eq!(SubscriptionId::from_sequence(0).as_str(), "sub-0");
        assert_eq!(SubscriptionId::from_sequence(12).to_string(), "sub-12");
    }

    #[tokio::test]
    async fn test_event_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(3, tx);

        assert!(sink.emit(TransportEvent::Connected));
        assert_eq!(rx.recv().await, Some((3, TransportEvent::Connected)));

        drop(rx);
        assert!(!sink.emit(TransportEvent::Closed { reason: None }));
    }
}
