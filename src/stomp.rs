//! STOMP 1.2 over WebSocket.
//!
//! Each call to [`StompTransport::open`] spawns one session task that dials
//! the endpoint, performs the CONNECT handshake and then multiplexes reads,
//! outbound commands and heart-beats until the session ends. The task never
//! reconnects; it reports `Closed` and lets the manager decide.

use crate::config::{HeartbeatConfig, ManagerConfig};
use crate::error::Error;
use crate::frame::{Command, Frame, FrameError};
use crate::health::{self, HeartbeatMonitor};
use crate::metrics::Metrics;
use crate::transport::{
    ConnectRequest, EventSink, SubscriptionId, Transport, TransportEvent, TransportSession,
};
use futures_util::{SinkExt, Stream, StreamExt};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    client_async_tls_with_config, tungstenite, tungstenite::client::IntoClientRequest,
    tungstenite::Message, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

/// STOMP versions offered in CONNECT
const ACCEPT_VERSION: &str = "1.2,1.1";

/// WebSocket subprotocols offered during the upgrade
const SUBPROTOCOLS: &str = "v12.stomp, v11.stomp";

/// Upper bound on the select loop's sleep when heart-beats are off or far away
const MAX_IDLE_CHECK: Duration = Duration::from_secs(1);

/// Type alias for WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Settings for STOMP sessions
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,
    /// Heart-beat offer sent in CONNECT
    pub heartbeat: HeartbeatConfig,
    /// Bound on the WebSocket upgrade and on the CONNECTED reply, each
    pub connect_timeout: Duration,
    /// Largest inbound frame buffered while waiting for its terminator
    pub max_frame_size: usize,
}

impl From<&ManagerConfig> for StompConfig {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            url: config.endpoint.clone(),
            heartbeat: config.heartbeat.clone(),
            connect_timeout: config.connect_timeout,
            max_frame_size: config.max_frame_size,
        }
    }
}

/// Commands that can be sent to a session task
#[derive(Debug)]
enum SessionCommand {
    Subscribe {
        id: SubscriptionId,
        destination: String,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Send {
        destination: String,
        body: String,
    },
    /// Send DISCONNECT and close the socket
    Close,
}

/// [`Transport`] speaking STOMP over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct StompTransport {
    config: Arc<StompConfig>,
    metrics: Arc<Metrics>,
}

impl StompTransport {
    pub fn new(config: StompConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Record heart-beat counters into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }
}

impl Transport for StompTransport {
    type Session = StompSession;

    fn open(&self, request: ConnectRequest, events: EventSink) -> StompSession {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_session(
            self.config.clone(),
            request,
            events,
            command_rx,
            self.metrics.clone(),
        ));
        StompSession {
            commands: command_tx,
        }
    }
}

/// Handle to a running STOMP session. Dropping it closes the session.
#[derive(Debug)]
pub struct StompSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl StompSession {
    fn send(&self, command: SessionCommand) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::ChannelSend("STOMP session has stopped".to_string()))
    }
}

impl TransportSession for StompSession {
    fn subscribe(&self, id: &SubscriptionId, destination: &str) -> Result<(), Error> {
        self.send(SessionCommand::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
        })
    }

    fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), Error> {
        self.send(SessionCommand::Unsubscribe { id: id.clone() })
    }

    fn publish(&self, destination: &str, body: &str) -> Result<(), Error> {
        self.send(SessionCommand::Send {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn close(&self) {
        let _ = self.send(SessionCommand::Close);
    }
}

/// Session task: always finishes by reporting `Closed`
async fn run_session(
    config: Arc<StompConfig>,
    request: ConnectRequest,
    events: EventSink,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    metrics: Arc<Metrics>,
) {
    let session = events.generation();
    let reason = match connect_and_run(&config, &request, &events, &mut commands, &metrics).await {
        Ok(None) => {
            info!("[STOMP] Session #{} closed", session);
            None
        }
        Ok(Some(reason)) => {
            info!("[STOMP] Session #{} ended: {}", session, reason);
            Some(reason)
        }
        Err(Error::Protocol(message)) => {
            warn!("[STOMP] Session #{} broker error: {}", session, message);
            events.emit(TransportEvent::ProtocolError(message.clone()));
            Some(message)
        }
        Err(e) => {
            metrics.record_error();
            warn!("[STOMP] Session #{} failed: {}", session, e);
            Some(e.to_string())
        }
    };
    events.emit(TransportEvent::Closed { reason });
}

/// Returns `Ok(None)` when closed locally, `Ok(Some(reason))` when the peer went away.
async fn connect_and_run(
    config: &StompConfig,
    request: &ConnectRequest,
    events: &EventSink,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    metrics: &Metrics,
) -> Result<Option<String>, Error> {
    let session = events.generation();
    debug!(
        "[STOMP] Session #{} connecting to {} (headers={})",
        session,
        config.url,
        request.headers.len()
    );

    let ws_stream = match timeout(config.connect_timeout, connect_websocket(&config.url)).await {
        Ok(stream) => stream?,
        Err(_) => {
            return Err(Error::ConnectionFailed {
                attempts: 0,
                last_error: "Connection timeout".to_string(),
            })
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let host = stomp_host(&config.url)?;
    let connect = connect_frame(&config.heartbeat, &host, request);
    write.send(Message::text(connect.encode())).await?;

    let handshake = await_connected(&mut read, config.max_frame_size);
    let connected = match timeout(config.connect_timeout, handshake).await {
        Ok(frame) => frame?,
        Err(_) => {
            return Err(Error::ConnectionFailed {
                attempts: 0,
                last_error: "Timed out waiting for CONNECTED".to_string(),
            })
        }
    };

    let negotiated = health::negotiate(&config.heartbeat, connected.get("heart-beat"));
    info!(
        "[STOMP] Session #{} connected to {} (version={}, server={}, heart-beat out={:?} in={:?})",
        session,
        config.url,
        connected.get("version").unwrap_or("1.0"),
        connected.get("server").unwrap_or("unknown"),
        negotiated.outgoing,
        negotiated.incoming
    );

    if !events.emit(TransportEvent::Connected) {
        // The manager is gone
        let _ = write.send(Message::text(disconnect_frame())).await;
        return Ok(None);
    }

    let mut health = HeartbeatMonitor::new(negotiated);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let next_check = health
            .time_until_next_check()
            .unwrap_or(MAX_IDLE_CHECK)
            .min(MAX_IDLE_CHECK);

        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        health.record_received();
                        buffer.extend_from_slice(text.as_bytes());
                        handle_inbound(&mut buffer, config.max_frame_size, events, metrics)?;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        health.record_received();
                        buffer.extend_from_slice(&data);
                        handle_inbound(&mut buffer, config.max_frame_size, events, metrics)?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        health.record_received();
                        trace!("[STOMP] Session #{} received ping, sending pong", session);
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        health.record_received();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!(
                                "closed by broker ({}): {}",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => "closed by broker".to_string(),
                        };
                        return Ok(Some(reason));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        return Err(Error::WebSocket(e));
                    }
                    None => {
                        return Ok(Some("WebSocket stream ended".to_string()));
                    }
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(SessionCommand::Close) | None => {
                        debug!("[STOMP] Session #{} closing", session);
                        let _ = write.send(Message::text(disconnect_frame())).await;
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(None);
                    }
                    Some(command) => {
                        let frame = command_frame(command);
                        trace!("[STOMP] Session #{} >>> {}", session, frame.command);
                        write.send(Message::text(frame.encode())).await?;
                        health.record_sent();
                    }
                }
            }

            _ = tokio::time::sleep(next_check) => {
                if health.is_incoming_timeout() {
                    let window = health.incoming_deadline().unwrap_or_default();
                    return Err(Error::HeartbeatTimeout(window));
                }

                if health.should_send_heartbeat() {
                    write.send(Message::text("\n")).await?;
                    health.record_sent();
                    metrics.record_heartbeat_sent();
                    trace!("[STOMP] Session #{} sent heart-beat", session);
                }
            }
        }
    }
}

/// Wait for the broker's reply to CONNECT
async fn await_connected<S>(read: &mut S, max_frame_size: usize) -> Result<Frame, Error>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => buffer.extend_from_slice(text.as_bytes()),
            Message::Binary(data) => buffer.extend_from_slice(&data),
            Message::Close(_) => {
                return Err(Error::ConnectionFailed {
                    attempts: 0,
                    last_error: "Closed during STOMP handshake".to_string(),
                })
            }
            _ => continue,
        }

        match Frame::decode(&buffer) {
            Ok(Some((frame, _))) => {
                return match frame.command {
                    Command::Connected => Ok(frame),
                    Command::Error => Err(Error::Protocol(error_message(&frame))),
                    other => Err(Error::Protocol(format!("expected CONNECTED, got {}", other))),
                };
            }
            Ok(None) => buffer.clear(),
            // Frame split across WebSocket messages
            Err(FrameError::MissingTerminator) => check_frame_size(&buffer, max_frame_size)?,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::ConnectionFailed {
        attempts: 0,
        last_error: "Stream ended during STOMP handshake".to_string(),
    })
}

/// Decode and dispatch every complete frame in `buffer`.
///
/// Incomplete trailing data stays buffered, up to `max_frame_size` bytes. An
/// undecodable frame is skipped through its NUL terminator and decoding
/// resumes after it. An ERROR frame ends the session.
fn handle_inbound(
    buffer: &mut Vec<u8>,
    max_frame_size: usize,
    events: &EventSink,
    metrics: &Metrics,
) -> Result<(), Error> {
    loop {
        match Frame::decode(buffer) {
            Ok(Some((frame, consumed))) => {
                buffer.drain(..consumed);
                dispatch(frame, events)?;
            }
            Ok(None) => {
                if !buffer.is_empty() {
                    metrics.record_heartbeat_received();
                    buffer.clear();
                }
                return Ok(());
            }
            Err(FrameError::MissingTerminator) => break,
            Err(e) => {
                // Wait for the terminator before discarding anything
                let Some(end) = buffer.iter().position(|b| *b == 0) else {
                    break;
                };
                metrics.record_error();
                warn!("[STOMP] Dropping {} undecodable bytes: {}", end + 1, e);
                buffer.drain(..=end);
            }
        }
    }
    check_frame_size(buffer, max_frame_size)
}

fn check_frame_size(buffer: &[u8], limit: usize) -> Result<(), Error> {
    if buffer.len() > limit {
        return Err(FrameError::FrameTooLarge {
            size: buffer.len(),
            limit,
        }
        .into());
    }
    Ok(())
}

fn dispatch(frame: Frame, events: &EventSink) -> Result<(), Error> {
    match frame.command {
        Command::Message => {
            let Some(subscription) = frame.get("subscription") else {
                warn!("[STOMP] MESSAGE without subscription header, dropping");
                return Ok(());
            };
            let subscription = SubscriptionId::from(subscription);
            let destination = frame.get("destination").unwrap_or_default().to_string();
            events.emit(TransportEvent::Frame {
                subscription,
                destination,
                body: frame.body,
            });
            Ok(())
        }
        Command::Error => Err(Error::Protocol(error_message(&frame))),
        Command::Receipt => {
            trace!("[STOMP] Receipt {}", frame.get("receipt-id").unwrap_or("?"));
            Ok(())
        }
        other => {
            debug!("[STOMP] Ignoring unexpected {} frame", other);
            Ok(())
        }
    }
}

/// Human-readable text of an ERROR frame
fn error_message(frame: &Frame) -> String {
    match (frame.get("message"), frame.body.trim()) {
        (Some(message), "") => message.to_string(),
        (Some(message), body) => format!("{}: {}", message, body),
        (None, "") => "broker sent ERROR".to_string(),
        (None, body) => body.to_string(),
    }
}

fn connect_frame(heartbeat: &HeartbeatConfig, host: &str, request: &ConnectRequest) -> Frame {
    let frame = Frame::new(Command::Connect)
        .header("accept-version", ACCEPT_VERSION)
        .header("host", host)
        .header("heart-beat", heartbeat.header_value());
    request
        .headers
        .iter()
        .fold(frame, |frame, (name, value)| frame.header(name, value))
}

fn command_frame(command: SessionCommand) -> Frame {
    match command {
        SessionCommand::Subscribe { id, destination } => Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto"),
        SessionCommand::Unsubscribe { id } => {
            Frame::new(Command::Unsubscribe).header("id", id.as_str())
        }
        SessionCommand::Send { destination, body } => Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body),
        SessionCommand::Close => Frame::new(Command::Disconnect),
    }
}

fn disconnect_frame() -> String {
    Frame::new(Command::Disconnect).encode()
}

/// Virtual host for the CONNECT frame
fn stomp_host(url: &str) -> Result<String, Error> {
    let parsed = Url::parse(url).map_err(|e| Error::ConnectionFailed {
        attempts: 0,
        last_error: format!("Invalid URL: {}", e),
    })?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| Error::ConnectionFailed {
            attempts: 0,
            last_error: "No host in URL".to_string(),
        })
}

/// Dial `url` and complete the WebSocket upgrade, offering the STOMP subprotocols
async fn connect_websocket(url: &str) -> Result<WsStream, Error> {
    let parsed_url = Url::parse(url).map_err(|e| Error::ConnectionFailed {
        attempts: 0,
        last_error: format!("Invalid URL: {}", e),
    })?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| Error::ConnectionFailed {
            attempts: 0,
            last_error: "No host in URL".to_string(),
        })?;

    let is_tls = parsed_url.scheme() == "wss";
    let port = parsed_url.port().unwrap_or(if is_tls { 443 } else { 80 });

    let mut request = url
        .into_client_request()
        .map_err(|e| Error::ConnectionFailed {
            attempts: 0,
            last_error: format!("Invalid WebSocket request: {}", e),
        })?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOLS));

    let tcp_stream = connect_direct(host, port).await?;
    set_tcp_options(&tcp_stream);

    let connector = if is_tls {
        let tls = native_tls::TlsConnector::new().map_err(|e| Error::ConnectionFailed {
            attempts: 0,
            last_error: format!("TLS error: {}", e),
        })?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (ws_stream, response) = client_async_tls_with_config(request, tcp_stream, None, connector)
        .await
        .map_err(Error::WebSocket)?;
    debug!(
        "[STOMP] WebSocket upgraded (subprotocol={:?})",
        response.headers().get(SEC_WEBSOCKET_PROTOCOL)
    );

    Ok(ws_stream)
}

async fn connect_direct(host: &str, port: u16) -> Result<tokio::net::TcpStream, Error> {
    let dest_str = format!("{}:{}", host, port);
    let dest_addr: SocketAddr = tokio::net::lookup_host(&dest_str)
        .await
        .map_err(|e| Error::ConnectionFailed {
            attempts: 0,
            last_error: format!("DNS lookup failed: {}", e),
        })?
        .next()
        .ok_or_else(|| Error::ConnectionFailed {
            attempts: 0,
            last_error: format!("No addresses found for {}", host),
        })?;

    let socket = if dest_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| Error::ConnectionFailed {
        attempts: 0,
        last_error: format!("Failed to create socket: {}", e),
    })?;

    socket
        .connect(dest_addr)
        .await
        .map_err(|e| Error::ConnectionFailed {
            attempts: 0,
            last_error: format!("TCP connect to {} failed: {}", dest_addr, e),
        })
}

/// Set TCP options for low latency
fn set_tcp_options(stream: &tokio::net::TcpStream) {
    let sock2 = socket2::SockRef::from(stream);

    // Disable Nagle's algorithm
    let _ = sock2.set_nodelay(true);

    // Keepalive to detect dead connections
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock2.set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const LIMIT: usize = 64 * 1024;

    fn sink() -> (EventSink, mpsc::UnboundedReceiver<(u64, TransportEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(1, tx), rx)
    }

    fn text(s: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::text(s.to_string()))
    }

    #[test]
    fn test_connect_frame_headers() {
        let request = ConnectRequest {
            headers: vec![
                ("userId".to_string(), "42".to_string()),
                ("nickname".to_string(), "dev".to_string()),
            ],
        };
        let frame = connect_frame(&HeartbeatConfig::default(), "chat.example.com", &request);

        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get("accept-version"), Some("1.2,1.1"));
        assert_eq!(frame.get("host"), Some("chat.example.com"));
        assert_eq!(frame.get("heart-beat"), Some("4000,4000"));
        assert_eq!(frame.get("userId"), Some("42"));
        assert_eq!(frame.get("nickname"), Some("dev"));
    }

    #[test]
    fn test_command_frames() {
        let subscribe = command_frame(SessionCommand::Subscribe {
            id: SubscriptionId::from("sub-3"),
            destination: "/topic/room.7".to_string(),
        });
        assert_eq!(
            subscribe.encode(),
            "SUBSCRIBE\nid:sub-3\ndestination:/topic/room.7\nack:auto\n\n\0"
        );

        let send = command_frame(SessionCommand::Send {
            destination: "/app/chat.sendMessage".to_string(),
            body: "{}".to_string(),
        });
        assert_eq!(send.get("content-type"), Some("application/json"));
        assert_eq!(send.body, "{}");

        let unsubscribe = command_frame(SessionCommand::Unsubscribe {
            id: SubscriptionId::from("sub-3"),
        });
        assert_eq!(unsubscribe.encode(), "UNSUBSCRIBE\nid:sub-3\n\n\0");
    }

    #[test]
    fn test_stomp_host() {
        assert_eq!(stomp_host("ws://localhost:8080/ws").unwrap(), "localhost");
        assert_eq!(
            stomp_host("wss://chat.example.com/ws").unwrap(),
            "chat.example.com"
        );
        assert!(stomp_host("not a url").is_err());
    }

    #[test]
    fn test_error_message() {
        let frame = Frame::new(Command::Error)
            .header("message", "Access denied")
            .with_body("bad token\n");
        assert_eq!(error_message(&frame), "Access denied: bad token");
        assert_eq!(error_message(&Frame::new(Command::Error)), "broker sent ERROR");
    }

    #[tokio::test]
    async fn test_await_connected() {
        let mut read = stream::iter(vec![
            text("\n"),
            text("CONNECTED\nversion:1.2\nheart-"),
            text("beat:10000,10000\n\n\0"),
        ]);
        let frame = await_connected(&mut read, LIMIT).await.expect("connected");
        assert_eq!(frame.get("version"), Some("1.2"));
        assert_eq!(frame.get("heart-beat"), Some("10000,10000"));
    }

    #[tokio::test]
    async fn test_await_connected_split_after_leading_newlines() {
        let mut read = stream::iter(vec![text("\n\nCONNEC"), text("TED\nversion:1.2\n\n\0")]);
        let frame = await_connected(&mut read, LIMIT).await.expect("connected");
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
    }

    #[tokio::test]
    async fn test_await_connected_rejects_oversized_reply() {
        let mut read = stream::iter(vec![
            text("CONNECTED\nversion:1.2\n"),
            text(&"x".repeat(128)),
        ]);
        assert!(matches!(
            await_connected(&mut read, 64).await,
            Err(Error::Frame(FrameError::FrameTooLarge { limit: 64, .. }))
        ));
    }

    #[tokio::test]
    async fn test_await_connected_error_frame() {
        let mut read = stream::iter(vec![text("ERROR\nmessage:Bad CONNECT\n\n\0")]);
        match await_connected(&mut read, LIMIT).await {
            Err(Error::Protocol(message)) => assert_eq!(message, "Bad CONNECT"),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_await_connected_stream_ends() {
        let mut read = stream::iter(Vec::<Result<Message, tungstenite::Error>>::new());
        assert!(matches!(
            await_connected(&mut read, LIMIT).await,
            Err(Error::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_handle_inbound_dispatches_messages() {
        let (events, mut rx) = sink();
        let metrics = Metrics::new();
        let body = r#"{"roomId":"7","content":"hi","messageType":"TEXT"}"#;
        let mut buffer = format!(
            "MESSAGE\nsubscription:sub-0\ndestination:/topic/room.7\nmessage-id:1\n\n{}\0\n",
            body
        )
        .into_bytes();

        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();

        assert!(buffer.is_empty());
        assert_eq!(
            rx.recv().await,
            Some((
                1,
                TransportEvent::Frame {
                    subscription: SubscriptionId::from("sub-0"),
                    destination: "/topic/room.7".to_string(),
                    body: body.to_string(),
                }
            ))
        );
        assert_eq!(metrics.heartbeats_received(), 1);
    }

    #[test]
    fn test_handle_inbound_keeps_partial_frame() {
        let (events, _rx) = sink();
        let metrics = Metrics::new();
        let mut buffer = b"MESSAGE\nsubscription:sub-0\n\nhal".to_vec();

        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();
        assert_eq!(buffer, b"MESSAGE\nsubscription:sub-0\n\nhal".to_vec());
    }

    #[test]
    fn test_handle_inbound_error_frame_ends_session() {
        let (events, _rx) = sink();
        let metrics = Metrics::new();
        let mut buffer = b"ERROR\nmessage:session expired\n\n\0".to_vec();

        match handle_inbound(&mut buffer, LIMIT, &events, &metrics) {
            Err(Error::Protocol(message)) => assert_eq!(message, "session expired"),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_handle_inbound_drops_garbage() {
        let (events, _rx) = sink();
        let metrics = Metrics::new();
        let mut buffer = b"HELLO\n\n\0".to_vec();

        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(metrics.errors(), 1);
    }

    #[tokio::test]
    async fn test_handle_inbound_resumes_after_garbage() {
        let (events, mut rx) = sink();
        let metrics = Metrics::new();
        let mut buffer =
            b"HELLO\n\n\0MESSAGE\nsubscription:sub-0\ndestination:/topic/room.7\n\nhi\0".to_vec();

        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();

        assert!(buffer.is_empty());
        assert_eq!(metrics.errors(), 1);
        assert_eq!(
            rx.recv().await,
            Some((
                1,
                TransportEvent::Frame {
                    subscription: SubscriptionId::from("sub-0"),
                    destination: "/topic/room.7".to_string(),
                    body: "hi".to_string(),
                }
            ))
        );
    }

    #[test]
    fn test_handle_inbound_waits_for_terminator_of_garbage() {
        let (events, _rx) = sink();
        let metrics = Metrics::new();
        let mut buffer = b"HELLO\nworld".to_vec();

        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();
        assert_eq!(buffer, b"HELLO\nworld".to_vec());
        assert_eq!(metrics.errors(), 0);

        buffer.extend_from_slice(b"\0\n");
        handle_inbound(&mut buffer, LIMIT, &events, &metrics).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(metrics.errors(), 1);
    }

    #[test]
    fn test_handle_inbound_rejects_oversized_frame() {
        let (events, _rx) = sink();
        let metrics = Metrics::new();
        let mut buffer = b"MESSAGE\nsubscription:sub-0\n\n".to_vec();
        buffer.extend(std::iter::repeat(b'x').take(256));

        match handle_inbound(&mut buffer, 128, &events, &metrics) {
            Err(Error::Frame(FrameError::FrameTooLarge { size, limit })) => {
                assert_eq!(limit, 128);
                assert!(size > 128);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reports_closed_when_unreachable() {
        let config = StompConfig {
            // Port 9 (discard) on localhost is expected to refuse
            url: "ws://127.0.0.1:9/ws".to_string(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(2),
            max_frame_size: LIMIT,
        };
        let transport = StompTransport::new(config);
        let (events, mut rx) = sink();

        let _session = transport.open(ConnectRequest { headers: vec![] }, events);

        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some((1, TransportEvent::Closed { reason }))) => assert!(reason.is_some()),
            other => panic!("expected Closed, got {:?}", other),
        }
    }
}
