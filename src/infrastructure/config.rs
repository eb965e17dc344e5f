//! Configuration management
//!
//! Connection settings are plain serde structs with per-field defaults so a
//! partial config.toml (or none at all) still yields a usable client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::frame::DEFAULT_MAX_MESSAGE_SIZE;

/// Top-level configuration for the `rust-ws` binary
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub websocket: WebSocketConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for one WebSocket connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` URL
    #[serde(default)]
    pub url: String,

    /// Budget for TCP connect, TLS handshake and upgrade, each
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Largest frame or reassembled message accepted or sent
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Backoff base; attempt n waits n * reconnect_delay_ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Read timeout of the I/O loop, bounds how fast a stop is observed
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Socket write timeout once open; 0 disables it
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Fail the handshake on a wrong Sec-WebSocket-Accept
    #[serde(default)]
    pub verify_accept: bool,

    /// Extra headers sent with the upgrade request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub ping: PingConfig,
}

/// How keepalives are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PingMode {
    Disabled,
    /// Ping control frames
    Opcode,
    /// Application-level text message (e.g. `"ping"`)
    TextMessage,
}

/// Heartbeat settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PingConfig {
    #[serde(default = "default_ping_mode")]
    pub mode: PingMode,

    #[serde(default = "default_ping_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_ping_timeout_ms")]
    pub timeout_ms: u64,

    /// Payload for `TextMessage` mode
    #[serde(default = "default_ping_text")]
    pub text_message: String,

    /// Text reply that counts as a pong (e.g. `"pong"`)
    #[serde(default)]
    pub text_pong: Option<String>,

    /// Answer server pings automatically
    #[serde(default = "default_true")]
    pub auto_pong: bool,

    /// Treat a pong timeout as a dropped connection
    #[serde(default)]
    pub close_on_timeout: bool,
}

/// Logging settings for the binary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub console: bool,
}

impl WebSocketConfig {
    /// Defaults with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Never zero; a zero read timeout means "block forever" to the socket
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// `None` when disabled
    #[inline]
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

impl PingConfig {
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_message_size: default_max_message_size(),
            auto_reconnect: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            verify_accept: false,
            headers: BTreeMap::new(),
            ping: PingConfig::default(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            mode: default_ping_mode(),
            interval_ms: default_ping_interval_ms(),
            timeout_ms: default_ping_timeout_ms(),
            text_message: default_ping_text(),
            text_pong: None,
            auto_pong: true,
            close_on_timeout: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
            console: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_ping_mode() -> PingMode {
    PingMode::Opcode
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_ping_timeout_ms() -> u64 {
    10_000
}

fn default_ping_text() -> String {
    "ping".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `$CONFIG_PATH` or config.toml
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(config_path)
    }

    /// Load configuration from an explicit path, defaults if missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::from_toml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) => None,
        }
    }
}
