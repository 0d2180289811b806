use std::time::Duration;
use url::Url;

/// Default broker endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Default cap on a single buffered inbound STOMP frame (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Configuration for the chat connection manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// WebSocket endpoint of the STOMP broker (ws:// or wss://)
    pub endpoint: String,
    /// Reconnection policy, owned by the manager
    pub reconnect: ReconnectConfig,
    /// STOMP heart-beat intervals offered in the CONNECT frame
    pub heartbeat: HeartbeatConfig,
    /// Timeout for the TCP/WebSocket/STOMP handshake as a whole
    pub connect_timeout: Duration,
    /// Largest inbound frame the session will buffer before giving up
    pub max_frame_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ManagerConfig {
    /// Create a new builder for configuration
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Load configuration from `CHAT_*` environment variables.
    ///
    /// Unset variables keep their defaults; values that fail to parse are
    /// reported rather than silently ignored.
    pub fn from_env() -> Result<ManagerConfig, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ManagerConfig, ConfigError> {
        let mut builder = ManagerConfig::builder();

        if let Some(endpoint) = lookup("CHAT_WS_URL") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(raw) = lookup("CHAT_MAX_RECONNECT_ATTEMPTS") {
            let attempts = parse_env("CHAT_MAX_RECONNECT_ATTEMPTS", &raw)?;
            builder = builder.max_reconnect_attempts(attempts);
        }
        if let Some(raw) = lookup("CHAT_RECONNECT_DELAY_MS") {
            let ms: u64 = parse_env("CHAT_RECONNECT_DELAY_MS", &raw)?;
            builder = builder.reconnect_delay(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("CHAT_HEARTBEAT_INCOMING_MS") {
            let ms: u64 = parse_env("CHAT_HEARTBEAT_INCOMING_MS", &raw)?;
            builder.config.heartbeat.incoming = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("CHAT_HEARTBEAT_OUTGOING_MS") {
            let ms: u64 = parse_env("CHAT_HEARTBEAT_OUTGOING_MS", &raw)?;
            builder.config.heartbeat.outgoing = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("CHAT_CONNECT_TIMEOUT_MS") {
            let ms: u64 = parse_env("CHAT_CONNECT_TIMEOUT_MS", &raw)?;
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("CHAT_MAX_FRAME_SIZE") {
            builder = builder.max_frame_size(parse_env("CHAT_MAX_FRAME_SIZE", &raw)?);
        }

        builder.build()
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        key,
        message: e.to_string(),
    })
}

/// Builder for ManagerConfig
#[derive(Debug, Clone, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the broker endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set reconnection configuration
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config.reconnect = config;
        self
    }

    /// Set the maximum number of reconnect attempts since the last successful connect
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Set the base reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect.delay = delay;
        if self.config.reconnect.max_delay < delay {
            self.config.reconnect.max_delay = delay;
        }
        self
    }

    /// Set heart-beat configuration
    pub fn heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.config.heartbeat = config;
        self
    }

    /// Set the handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the largest inbound frame accepted, in bytes
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Build the configuration with validation.
    pub fn build(self) -> Result<ManagerConfig, ConfigError> {
        let endpoint = self.config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::InvalidEndpoint("endpoint cannot be empty".to_string()));
        }
        let url = Url::parse(endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidEndpoint(format!(
                "scheme must be ws or wss, got {}",
                url.scheme()
            )));
        }

        if self.config.reconnect.max_delay < self.config.reconnect.delay {
            return Err(ConfigError::InvalidReconnect(
                "max_delay must be >= delay".to_string(),
            ));
        }

        if self.config.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidReconnect(
                "multiplier must be >= 1.0".to_string(),
            ));
        }

        if self.config.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        if self.config.max_frame_size == 0 {
            return Err(ConfigError::InvalidFrameSize(
                "max_frame_size must be > 0".to_string(),
            ));
        }

        Ok(self.config)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid endpoint URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// Invalid reconnect configuration
    #[error("Invalid reconnect configuration: {0}")]
    InvalidReconnect(String),
    /// Invalid timeout
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid frame size limit
    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(String),
    /// Environment variable present but unparsable
    #[error("Invalid value for {key}: {message}")]
    InvalidEnv { key: &'static str, message: String },
}

/// Reconnection policy.
///
/// The defaults reproduce a fixed 5 second delay. Raising `multiplier`
/// turns it into exponential backoff capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Attempts allowed since the last successful connect (0 = never retry)
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    pub delay: Duration,
    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,
    /// Multiplier for backoff (1.0 = fixed delay)
    pub multiplier: f64,
    /// Whether to add random jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(5000),
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            // Full jitter: random value between 0 and capped_delay
            let jittered = rand::random::<f64>() * capped_delay;
            Duration::from_millis(jittered as u64)
        } else {
            Duration::from_millis(capped_delay as u64)
        }
    }
}

/// STOMP heart-beat intervals; zero disables a direction
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often we promise to send something
    pub outgoing: Duration,
    /// How often we want to hear from the broker
    pub incoming: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            outgoing: Duration::from_millis(4000),
            incoming: Duration::from_millis(4000),
        }
    }
}

impl HeartbeatConfig {
    /// Value of the `heart-beat` header in the CONNECT frame
    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }
}
