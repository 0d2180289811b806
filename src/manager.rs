use crate::config::ManagerConfig;
use crate::error::Error;
use crate::message::{room_topic, ChatMessage, Identity, Inbound, MessageId};
use crate::metrics::Metrics;
use crate::registry::{LiveHandle, SubscriptionRegistry};
use crate::state::{ConnectionState, ConnectionStatus, StatusReport};
use crate::stomp::{StompConfig, StompTransport};
use crate::transport::{
    ConnectRequest, EventSink, SubscriptionId, Transport, TransportEvent, TransportSession,
};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, trace, warn};

type EventTx = mpsc::UnboundedSender<(u64, TransportEvent)>;
type EventRx = mpsc::UnboundedReceiver<(u64, TransportEvent)>;
type ConnectWaiter = oneshot::Sender<Result<(), Error>>;

/// Owns the single realtime connection and multiplexes room subscriptions over it.
///
/// Construct one per application and hand out clones; every clone refers to
/// the same connection. Subscriptions survive transport drops and are
/// re-attached automatically when the manager reconnects.
///
/// # Thread Safety
///
/// `ChatManager` is `Send + Sync`. State is kept behind one
/// `parking_lot::Mutex` that is never held across an await point or while a
/// room handler runs, so handlers may call back into the manager.
pub struct ChatManager<T: Transport = StompTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ChatManager<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<T: Transport> {
    transport: T,
    config: ManagerConfig,
    metrics: Arc<Metrics>,
    state: Mutex<ManagerState<T::Session>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

struct ManagerState<S> {
    connection: ConnectionState,
    registry: SubscriptionRegistry,
    session: Option<S>,
    /// Generation of the current session; events stamped otherwise are stale
    generation: u64,
    /// Bumped whenever a connect lifecycle starts or is torn down
    lifecycle: u64,
    identity: Option<Identity>,
    events_tx: Option<EventTx>,
    /// Present while a lifecycle is active (connecting, connected or waiting to retry)
    driver: Option<JoinHandle<()>>,
    waiters: Vec<ConnectWaiter>,
    /// Whether this lifecycle has been connected before (for reconnect metrics)
    was_established: bool,
}

impl<S> Default for ManagerState<S> {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            registry: SubscriptionRegistry::new(),
            session: None,
            generation: 0,
            lifecycle: 0,
            identity: None,
            events_tx: None,
            driver: None,
            waiters: Vec::new(),
            was_established: false,
        }
    }
}

/// What the driver does after handling an event
enum Next {
    Continue,
    Reconnect(Duration),
    Stop,
}

impl ChatManager<StompTransport> {
    /// Create a manager speaking STOMP over WebSocket to `config.endpoint`
    pub fn new(config: ManagerConfig) -> Self {
        let metrics = Arc::new(Metrics::new());
        let transport =
            StompTransport::new(StompConfig::from(&config)).with_metrics(metrics.clone());
        Self::build(config, transport, metrics)
    }

    /// Create a manager configured from `CHAT_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::new(ManagerConfig::from_env()?))
    }
}

impl<T: Transport> ChatManager<T> {
    /// Create a manager over a custom transport
    pub fn with_transport(config: ManagerConfig, transport: T) -> Self {
        Self::build(config, transport, Arc::new(Metrics::new()))
    }

    fn build(config: ManagerConfig, transport: T, metrics: Arc<Metrics>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                metrics,
                state: Mutex::new(ManagerState::default()),
                status_tx,
            }),
        }
    }

    /// Get the metrics for this manager
    pub fn metrics(&self) -> Arc<Metrics> {
        self.shared.metrics.clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Connect with `identity`.
    ///
    /// Resolves immediately when already connected. While an attempt is in
    /// flight (including the wait between reconnect attempts) further calls
    /// join it instead of opening another transport. Fails only when
    /// reconnect attempts are exhausted or `disconnect` tears the attempt down.
    pub async fn connect(&self, identity: Identity) -> Result<(), Error> {
        let rx = {
            let mut guard = self.shared.state.lock();
            if guard.connection.status.is_connected() {
                trace!("connect() while connected, nothing to do");
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            guard.waiters.push(tx);

            if guard.driver.is_none() {
                Shared::start_lifecycle(&self.shared, &mut guard, identity);
            } else {
                if guard.identity.as_ref() != Some(&identity) {
                    warn!(
                        "connect() for user {} joined an in-flight attempt with another identity",
                        identity.user_id
                    );
                }
                debug!("connect() joined the attempt already in flight");
            }
            rx
        };

        rx.await.unwrap_or(Err(Error::ShuttingDown))
    }

    /// Tear everything down: release live subscriptions, clear the registry,
    /// close the transport and cancel pending reconnects.
    ///
    /// Pending `connect` calls fail with [`Error::ShuttingDown`]. Calling this
    /// when already disconnected is a no-op.
    pub fn disconnect(&self) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let idle = state.driver.is_none()
            && state.session.is_none()
            && state.registry.is_empty()
            && state.waiters.is_empty()
            && state.connection == ConnectionState::default();
        if idle {
            trace!("disconnect() while already disconnected, nothing to do");
            return;
        }

        let handles = state.registry.drain();
        if let Some(session) = state.session.take() {
            for handle in &handles {
                if let Err(e) = session.unsubscribe(&handle.id) {
                    debug!("Failed to release {} ({}): {}", handle.id, handle.destination, e);
                }
            }
            session.close();
        }

        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
        state.events_tx = None;
        state.identity = None;
        state.lifecycle += 1;
        state.generation += 1;
        state.was_established = false;

        let before = state.connection.status;
        state.connection.reset();
        if before != ConnectionStatus::Disconnected {
            self.shared.status_tx.send_replace(ConnectionStatus::Disconnected);
        }

        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Err(Error::ShuttingDown));
        }

        self.shared.metrics.forget_all_rooms();
        info!("Disconnected ({} live subscriptions released)", handles.len());
    }

    /// Subscribe `handler` to `room_id`, replacing any existing subscription.
    ///
    /// Returns `true` only if a live subscription was attached right away.
    /// When not connected the subscription is still registered and attaches
    /// on the next successful connect.
    pub fn subscribe_to_room<F>(&self, room_id: &str, handler: F) -> bool
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        if room_id.is_empty() {
            warn!("Refusing to subscribe to an empty room id");
            return false;
        }

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if let Some(previous) = state.registry.insert(room_id, Arc::new(handler)) {
            if let (Some(live), Some(session)) = (previous.live, state.session.as_ref()) {
                debug!("[ROOM-{}] Replacing live subscription {}", room_id, live.id);
                if let Err(e) = session.unsubscribe(&live.id) {
                    warn!("[ROOM-{}] Failed to release {}: {}", room_id, live.id, e);
                }
            }
        }

        if !state.connection.status.is_connected() {
            debug!(
                "[ROOM-{}] Not connected ({}), subscription will attach on connect",
                room_id, state.connection.status
            );
            return false;
        }

        attach(state, room_id)
    }

    /// Drop the subscription for `room_id`. Unknown rooms are ignored.
    ///
    /// A frame already queued for the room may still reach the handler once.
    pub fn unsubscribe_from_room(&self, room_id: &str) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let Some(removed) = state.registry.remove(room_id) else {
            trace!("[ROOM-{}] Not subscribed, nothing to release", room_id);
            return;
        };

        if let (Some(live), Some(session)) = (removed.live, state.session.as_ref()) {
            if let Err(e) = session.unsubscribe(&live.id) {
                warn!("[ROOM-{}] Failed to release {}: {}", room_id, live.id, e);
            }
        }
        self.shared.metrics.forget_room(room_id);
        debug!("[ROOM-{}] Unsubscribed", room_id);
    }

    /// Publish a TEXT message. `false` when not connected or the hand-off failed.
    pub fn send_message(
        &self,
        room_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
    ) -> bool {
        self.publish(ChatMessage::text(room_id, sender_id, sender_name, content))
    }

    /// Publish a JOIN notice
    pub fn join_room(&self, room_id: &str, sender_id: &str, sender_name: &str) -> bool {
        self.publish(ChatMessage::join(room_id, sender_id, sender_name))
    }

    /// Publish a read receipt for `message_ids`
    pub fn mark_as_read<I>(&self, room_id: &str, user_id: &str, message_ids: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<MessageId>,
    {
        let ids = message_ids.into_iter().map(Into::into).collect();
        self.publish(ChatMessage::read(room_id, user_id, ids))
    }

    fn publish(&self, message: ChatMessage) -> bool {
        let guard = self.shared.state.lock();

        if !guard.connection.status.is_connected() {
            debug!(
                "[ROOM-{}] Not connected, dropping {} message",
                message.room_id(),
                message.message_type()
            );
            return false;
        }
        let Some(session) = guard.session.as_ref() else {
            return false;
        };

        let body = match serde_json::to_string(&message) {
            Ok(body) => body,
            Err(e) => {
                warn!("[ROOM-{}] Failed to serialize message: {}", message.room_id(), e);
                return false;
            }
        };

        match session.publish(message.destination(), &body) {
            Ok(()) => {
                self.shared.metrics.record_message_sent();
                trace!(
                    "[ROOM-{}] Published {} to {}",
                    message.room_id(),
                    message.message_type(),
                    message.destination()
                );
                true
            }
            Err(e) => {
                self.shared.metrics.record_error();
                warn!("[ROOM-{}] Publish failed: {}", message.room_id(), e);
                false
            }
        }
    }

    /// `{is_connected, error}` for consumers polling status
    pub fn get_connection_status(&self) -> StatusReport {
        self.shared.state.lock().connection.report()
    }

    /// Full state snapshot
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection.clone()
    }

    /// Receiver notified on every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Rooms currently registered, sorted
    pub fn subscribed_rooms(&self) -> Vec<String> {
        self.shared.state.lock().registry.rooms()
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.shared.state.lock().registry.contains(room_id)
    }

    /// Whether `room_id` currently has a live transport subscription
    pub fn is_live(&self, room_id: &str) -> bool {
        self.shared.state.lock().registry.is_live(room_id)
    }
}

impl<T: Transport> Shared<T> {
    fn start_lifecycle(
        this: &Arc<Self>,
        state: &mut ManagerState<T::Session>,
        identity: Identity,
    ) {
        state.lifecycle += 1;
        state.identity = Some(identity);
        state.connection.reconnect_attempts = 0;
        state.was_established = false;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.events_tx = Some(events_tx);
        this.open_session(state);

        let driver = tokio::spawn(run_driver(Arc::downgrade(this), events_rx, state.lifecycle));
        state.driver = Some(driver);
    }

    fn open_session(&self, state: &mut ManagerState<T::Session>) {
        let Some(events_tx) = state.events_tx.clone() else {
            return;
        };
        let Some(identity) = state.identity.as_ref() else {
            return;
        };
        let request = ConnectRequest {
            headers: identity.connect_headers(),
        };
        let user_id = identity.user_id.clone();

        state.generation += 1;
        self.set_status(state, ConnectionStatus::Connecting);
        info!(
            "Opening session #{} to {} as user {}",
            state.generation, self.config.endpoint, user_id
        );

        let session = self
            .transport
            .open(request, EventSink::new(state.generation, events_tx));
        state.session = Some(session);
    }

    fn set_status(&self, state: &mut ManagerState<T::Session>, next: ConnectionStatus) {
        if state.connection.transition(next) {
            self.status_tx.send_replace(next);
        }
    }

    fn handle_event(&self, generation: u64, event: TransportEvent) -> Next {
        match event {
            TransportEvent::Frame {
                subscription,
                destination,
                body,
            } => {
                self.deliver(generation, &subscription, &destination, &body);
                Next::Continue
            }
            TransportEvent::Connected => {
                self.on_established(generation);
                Next::Continue
            }
            TransportEvent::ProtocolError(message) => self.on_lost(generation, Some(message)),
            TransportEvent::Closed { reason } => self.on_lost(generation, reason),
        }
    }

    fn on_established(&self, generation: u64) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if generation != state.generation || state.session.is_none() {
            trace!("Ignoring establishment of stale session #{}", generation);
            return;
        }

        let is_reconnect = state.was_established;
        self.set_status(state, ConnectionStatus::Connected);
        state.was_established = true;

        self.metrics.record_connection();
        if is_reconnect {
            self.metrics.record_reconnection();
        }

        let restored = restore(state);
        info!(
            "Connected on session #{} ({} of {} subscriptions restored)",
            generation,
            restored,
            state.registry.len()
        );

        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_lost(&self, generation: u64, reason: Option<String>) -> Next {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if generation != state.generation || state.session.is_none() {
            trace!("Ignoring loss of stale session #{}", generation);
            return Next::Continue;
        }

        let was_connected = state.connection.status.is_connected();
        if let Some(session) = state.session.take() {
            session.close();
        }
        // Anything still in flight from this session is now stale
        state.generation += 1;
        let detached = state.registry.detach_all();

        self.metrics.record_error();
        if !was_connected {
            self.metrics.record_connect_failure();
        }
        if let Some(reason) = reason {
            state.connection.last_error = Some(reason);
        }
        self.set_status(state, ConnectionStatus::Disconnected);

        let last_error = state
            .connection
            .last_error
            .clone()
            .unwrap_or_else(|| "connection closed".to_string());
        warn!(
            "Session #{} lost ({} subscriptions detached): {}",
            generation, detached, last_error
        );

        let attempts = state.connection.reconnect_attempts;
        let max_attempts = self.config.reconnect.max_attempts;
        if attempts < max_attempts {
            let delay = self.config.reconnect.delay_for_attempt(attempts);
            state.connection.reconnect_attempts = attempts + 1;
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempts + 1,
                max_attempts
            );
            return Next::Reconnect(delay);
        }

        self.set_status(state, ConnectionStatus::Failed);
        error!(
            "Max reconnection attempts ({}) reached: {}",
            max_attempts, last_error
        );
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(Err(Error::ConnectionFailed {
                attempts,
                last_error: last_error.clone(),
            }));
        }
        state.driver = None;
        state.events_tx = None;
        Next::Stop
    }

    /// Open the next session of `lifecycle` after a reconnect delay.
    ///
    /// Returns `false` if the lifecycle was torn down meanwhile.
    fn reopen(&self, lifecycle: u64) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.lifecycle != lifecycle || state.driver.is_none() {
            return false;
        }
        if state.session.is_none() {
            self.open_session(state);
        }
        true
    }

    fn deliver(
        &self,
        generation: u64,
        subscription: &SubscriptionId,
        destination: &str,
        body: &str,
    ) {
        let route = {
            let state = self.state.lock();
            if generation != state.generation {
                trace!("Dropping frame from stale session #{}", generation);
                return;
            }
            state.registry.route(subscription)
        };

        let Some((room_id, handler)) = route else {
            trace!(
                "Dropping frame for released subscription {} ({})",
                subscription,
                destination
            );
            return;
        };

        let inbound = Inbound::decode(&room_id, body);
        if inbound.is_fallback() {
            warn!(
                "[ROOM-{}] Undecodable frame ({} bytes), delivering as system message",
                room_id,
                body.len()
            );
        } else if inbound.is_unrecognized() {
            debug!("[ROOM-{}] Delivering unrecognized message as received", room_id);
        }
        self.metrics.record_room_message(&room_id, inbound.is_fallback());

        if catch_unwind(AssertUnwindSafe(|| handler(inbound))).is_err() {
            self.metrics.record_handler_panic();
            error!("[ROOM-{}] Room handler panicked! Message dropped", room_id);
        }
    }
}

impl<T: Transport> Drop for Shared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(session) = state.session.take() {
            session.close();
        }
        if let Some(driver) = state.driver.take() {
            driver.abort();
        }
    }
}

/// Attach a live handle for `room_id` on the current session
fn attach<S: TransportSession>(state: &mut ManagerState<S>, room_id: &str) -> bool {
    let Some(session) = state.session.as_ref() else {
        return false;
    };

    let id = state.registry.next_subscription_id();
    let destination = room_topic(room_id);
    match session.subscribe(&id, &destination) {
        Ok(()) => {
            debug!("[ROOM-{}] Subscribed to {} as {}", room_id, destination, id);
            let attached = state.registry.attach(room_id, LiveHandle { id, destination });
            trace!("{} live subscriptions", state.registry.live_count());
            attached
        }
        Err(e) => {
            warn!("[ROOM-{}] Subscribe failed: {}", room_id, e);
            false
        }
    }
}

/// Re-attach every registered room that lacks a live handle
fn restore<S: TransportSession>(state: &mut ManagerState<S>) -> usize {
    let rooms = state.registry.unattached();
    rooms
        .iter()
        .filter(|room_id| attach(state, room_id))
        .count()
}

/// Consumes transport events for one connect lifecycle, in order.
///
/// Holds only a weak reference so dropping the last `ChatManager` ends it.
async fn run_driver<T: Transport>(shared: Weak<Shared<T>>, mut events: EventRx, lifecycle: u64) {
    while let Some((generation, event)) = events.recv().await {
        let Some(manager) = shared.upgrade() else {
            break;
        };
        match manager.handle_event(generation, event) {
            Next::Continue => {}
            Next::Reconnect(delay) => {
                drop(manager);
                tokio::time::sleep(delay).await;
                let Some(manager) = shared.upgrade() else {
                    break;
                };
                if !manager.reopen(lifecycle) {
                    break;
                }
            }
            Next::Stop => break,
        }
    }
    debug!("Event driver for lifecycle {} finished", lifecycle);
}
