use crate::config::HeartbeatConfig;
use std::time::Instant;
use tokio::time::Duration;

/// Grace factor applied to the incoming heart-beat interval before the
/// peer is declared dead.
const INCOMING_GRACE_FACTOR: u32 = 2;

/// Heart-beat intervals agreed with the broker; `None` disables a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedHeartbeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl NegotiatedHeartbeat {
    pub const DISABLED: NegotiatedHeartbeat = NegotiatedHeartbeat {
        outgoing: None,
        incoming: None,
    };
}

/// Negotiate heart-beats from our CONNECT offer and the broker's CONNECTED reply.
///
/// A missing or unparsable server header disables heart-beating.
pub fn negotiate(client: &HeartbeatConfig, server_header: Option<&str>) -> NegotiatedHeartbeat {
    let Some((sx, sy)) = server_header.and_then(parse_heartbeat_header) else {
        return NegotiatedHeartbeat::DISABLED;
    };
    let cx = client.outgoing.as_millis() as u64;
    let cy = client.incoming.as_millis() as u64;

    let outgoing = if cx == 0 || sy == 0 { None } else { Some(cx.max(sy)) };
    let incoming = if cy == 0 || sx == 0 { None } else { Some(cy.max(sx)) };

    NegotiatedHeartbeat {
        outgoing: outgoing.map(Duration::from_millis),
        incoming: incoming.map(Duration::from_millis),
    }
}

fn parse_heartbeat_header(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Tracks heart-beat state for a single STOMP session
#[derive(Debug)]
pub struct HeartbeatMonitor {
    negotiated: NegotiatedHeartbeat,

    /// Time of last frame or heart-beat written
    last_sent: Instant,

    /// Time of last byte received from the broker
    last_received: Instant,
}

impl HeartbeatMonitor {
    /// Create a new monitor; both clocks start now
    pub fn new(negotiated: NegotiatedHeartbeat) -> Self {
        let now = Instant::now();
        Self {
            negotiated,
            last_sent: now,
            last_received: now,
        }
    }

    pub fn negotiated(&self) -> NegotiatedHeartbeat {
        self.negotiated
    }

    /// Record that we wrote something (a frame counts as a heart-beat)
    pub fn record_sent(&mut self) {
        self.last_sent = Instant::now();
    }

    /// Record that the broker sent something
    pub fn record_received(&mut self) {
        self.last_received = Instant::now();
    }

    /// Check if a heart-beat EOL is due
    pub fn should_send_heartbeat(&self) -> bool {
        match self.negotiated.outgoing {
            None => false,
            Some(interval) => self.last_sent.elapsed() >= interval,
        }
    }

    /// Window after which silence from the broker is fatal
    pub fn incoming_deadline(&self) -> Option<Duration> {
        self.negotiated
            .incoming
            .map(|interval| interval * INCOMING_GRACE_FACTOR)
    }

    /// Check if the broker has been silent for too long
    pub fn is_incoming_timeout(&self) -> bool {
        match self.incoming_deadline() {
            None => false,
            Some(deadline) => self.last_received.elapsed() >= deadline,
        }
    }

    /// Time until the next heart-beat check is needed
    pub fn time_until_next_check(&self) -> Option<Duration> {
        let send = self
            .negotiated
            .outgoing
            .map(|interval| interval.saturating_sub(self.last_sent.elapsed()));
        let recv = self
            .incoming_deadline()
            .map(|deadline| deadline.saturating_sub(self.last_received.elapsed()));

        match (send, recv) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
