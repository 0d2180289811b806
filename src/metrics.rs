use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for observability
///
/// Counters are lock-free; per-room gauges sit behind a `parking_lot::RwLock`.
/// Use `snapshot()` to get a point-in-time view of everything.
///
/// # Example
/// ```ignore
/// let metrics = manager.metrics();
///
/// println!("Messages received: {}", metrics.messages_received());
///
/// let snapshot = metrics.snapshot();
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    connections_total: AtomicU64,
    reconnections_total: AtomicU64,
    connect_failures_total: AtomicU64,
    messages_received_total: AtomicU64,
    messages_sent_total: AtomicU64,
    malformed_frames_total: AtomicU64,
    handler_panics_total: AtomicU64,
    errors_total: AtomicU64,
    heartbeats_sent_total: AtomicU64,
    heartbeats_received_total: AtomicU64,

    /// Per-room metrics
    room_metrics: RwLock<HashMap<String, RoomMetrics>>,
}

/// Metrics for a single room
#[derive(Debug, Clone, Default)]
pub struct RoomMetrics {
    pub room_id: String,
    /// Messages delivered to the room's handler
    pub messages_received: u64,
    /// Of those, how many were fallbacks for undecodable frames
    pub malformed_frames: u64,
    /// Duration since last message received (None if no messages)
    pub time_since_last_message: Option<Duration>,
    #[doc(hidden)]
    pub(crate) last_message_at: Option<Instant>,
}

impl RoomMetrics {
    fn snapshot(&self) -> RoomMetrics {
        RoomMetrics {
            time_since_last_message: self.last_message_at.map(|t| t.elapsed()),
            ..self.clone()
        }
    }
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Getters ==========

    /// Get total sessions established
    pub fn connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total sessions established after a loss
    pub fn reconnections(&self) -> u64 {
        self.reconnections_total.load(Ordering::Relaxed)
    }

    /// Get total session attempts that ended before or after establishment
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures_total.load(Ordering::Relaxed)
    }

    /// Get total messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received_total.load(Ordering::Relaxed)
    }

    /// Get total messages handed to the transport
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent_total.load(Ordering::Relaxed)
    }

    /// Get total frames that fell back to a system message
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames_total.load(Ordering::Relaxed)
    }

    /// Get total room handler panics
    pub fn handler_panics(&self) -> u64 {
        self.handler_panics_total.load(Ordering::Relaxed)
    }

    /// Get total errors
    pub fn errors(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent_total.load(Ordering::Relaxed)
    }

    pub fn heartbeats_received(&self) -> u64 {
        self.heartbeats_received_total.load(Ordering::Relaxed)
    }

    // ========== Recording methods (called internally) ==========

    pub(crate) fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnection(&self) {
        self.reconnections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_sent(&self) {
        self.messages_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_panic(&self) {
        self.handler_panics_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_sent(&self) {
        self.heartbeats_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_heartbeat_received(&self) {
        self.heartbeats_received_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message delivered to `room_id`
    pub(crate) fn record_room_message(&self, room_id: &str, malformed: bool) {
        self.messages_received_total.fetch_add(1, Ordering::Relaxed);
        if malformed {
            self.malformed_frames_total.fetch_add(1, Ordering::Relaxed);
        }
        let mut rooms = self.room_metrics.write();
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomMetrics {
                room_id: room_id.to_string(),
                ..Default::default()
            });
        room.messages_received += 1;
        if malformed {
            room.malformed_frames += 1;
        }
        room.last_message_at = Some(Instant::now());
    }

    /// Drop the gauges of a room nobody listens to any more
    pub(crate) fn forget_room(&self, room_id: &str) {
        self.room_metrics.write().remove(room_id);
    }

    pub(crate) fn forget_all_rooms(&self) {
        self.room_metrics.write().clear();
    }

    /// Get a single room's metrics
    pub fn room(&self, room_id: &str) -> Option<RoomMetrics> {
        self.room_metrics.read().get(room_id).map(|r| r.snapshot())
    }

    /// Get a point-in-time snapshot of all metrics for export
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut rooms: Vec<RoomMetrics> = self
            .room_metrics
            .read()
            .values()
            .map(|r| r.snapshot())
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Acquire),
            reconnections_total: self.reconnections_total.load(Ordering::Acquire),
            connect_failures_total: self.connect_failures_total.load(Ordering::Acquire),
            messages_received_total: self.messages_received_total.load(Ordering::Acquire),
            messages_sent_total: self.messages_sent_total.load(Ordering::Acquire),
            malformed_frames_total: self.malformed_frames_total.load(Ordering::Acquire),
            handler_panics_total: self.handler_panics_total.load(Ordering::Acquire),
            errors_total: self.errors_total.load(Ordering::Acquire),
            heartbeats_sent_total: self.heartbeats_sent_total.load(Ordering::Acquire),
            heartbeats_received_total: self.heartbeats_received_total.load(Ordering::Acquire),
            rooms,
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub reconnections_total: u64,
    pub connect_failures_total: u64,
    pub messages_received_total: u64,
    pub messages_sent_total: u64,
    pub malformed_frames_total: u64,
    pub handler_panics_total: u64,
    pub errors_total: u64,
    pub heartbeats_sent_total: u64,
    pub heartbeats_received_total: u64,
    pub rooms: Vec<RoomMetrics>,
}
