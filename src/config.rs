//! # Configuration Management
//!
//! Runtime configuration for an action-protocol endpoint.
//!
//! ## Configuration Sources
//! - TOML files via [`ServiceConfig::from_file`]
//! - Direct instantiation with defaults
//! - `ACTION_PROTOCOL_*` environment overrides via [`ServiceConfig::from_env`]
//!
//! Durations are written as milliseconds. Every section may be omitted from a
//! file and falls back to its defaults.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Transfer chunk size (2 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Max allowed line-framed message (16 MiB)
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Lowest accepted heartbeat interval
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Top-level configuration of one endpoint
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `ACTION_PROTOCOL_*` environment variables.
    ///
    /// Unparsable values are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&var, "ACTION_PROTOCOL_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat.interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<u32>(&var, "ACTION_PROTOCOL_HEARTBEAT_MAX_FAILURES")? {
            config.heartbeat.max_failures = max;
        }
        if let Some(enabled) = parse_var::<bool>(&var, "ACTION_PROTOCOL_HEARTBEAT_ENABLED")? {
            config.heartbeat.enabled = enabled;
        }
        if let Some(dir) = var("ACTION_PROTOCOL_TRANSFER_DIR") {
            config.transfer.destination_dir = PathBuf::from(dir);
        }
        if let Some(size) = parse_var::<usize>(&var, "ACTION_PROTOCOL_TRANSFER_CHUNK_SIZE")? {
            config.transfer.chunk_size = size;
        }
        if let Some(len) = parse_var::<usize>(&var, "ACTION_PROTOCOL_MAX_FRAME_LENGTH")? {
            config.connection.max_frame_length = len;
        }
        if let Some(level) = var("ACTION_PROTOCOL_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.heartbeat.validate());
        errors.extend(self.transfer.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: {raw}"))),
    }
}

/// Session heartbeat supervision
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether connections start a heartbeat automatically
    pub enabled: bool,

    /// Probe interval
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Consecutive misses tolerated before a forced disconnect
    pub max_failures: u32,

    /// How long to wait for a matching pong
    #[serde(with = "duration_serde")]
    pub pong_timeout: Duration,

    /// Granularity of cancellation and liveness checks
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: timeout::KEEPALIVE_INTERVAL,
            max_failures: 3,
            pong_timeout: timeout::PONG_TIMEOUT,
            poll_interval: timeout::POLL_INTERVAL,
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.interval < MIN_HEARTBEAT_INTERVAL {
            errors.push("Heartbeat interval too short (minimum: 1s)".to_string());
        } else if self.interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.pong_timeout.as_millis() < 100 {
            errors.push("Pong timeout too short (minimum: 100ms)".to_string());
        }

        if self.poll_interval.as_millis() < 10 {
            errors.push("Poll interval too short (minimum: 10ms)".to_string());
        } else if self.poll_interval > self.interval {
            errors.push("Poll interval cannot exceed the heartbeat interval".to_string());
        }

        errors
    }
}

/// Chunked file transfer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where received files are written
    pub destination_dir: PathBuf,

    /// Bytes per `transmit.next` chunk
    pub chunk_size: usize,

    /// Empty the destination directory when the service starts
    pub clear_destination_on_start: bool,

    /// How often open streams check that their session is still alive
    #[serde(with = "duration_serde")]
    pub watchdog_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            destination_dir: std::env::temp_dir().join("action-protocol").join("transfers"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            clear_destination_on_start: true,
            watchdog_interval: timeout::POLL_INTERVAL,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.destination_dir.as_os_str().is_empty() {
            errors.push("Transfer destination directory cannot be empty".to_string());
        } else if self.destination_dir.exists() && !self.destination_dir.is_dir() {
            errors.push(format!(
                "Transfer destination is not a directory: {}",
                self.destination_dir.display()
            ));
        }

        if self.chunk_size == 0 {
            errors.push("Chunk size must be greater than 0".to_string());
        } else if self.chunk_size > MAX_FRAME_LENGTH / 2 {
            // base64 grows chunks by a third; keep them well inside one frame
            errors.push(format!(
                "Chunk size too large: {} bytes (maximum: {} bytes)",
                self.chunk_size,
                MAX_FRAME_LENGTH / 2
            ));
        }

        if self.watchdog_interval.as_millis() < 10 {
            errors.push("Watchdog interval too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Line-framed connection transport
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Longest accepted inbound line in bytes
    pub max_frame_length: usize,

    /// Outbound messages buffered before senders wait
    pub outbound_capacity: usize,

    /// Close the connection on an undecodable message instead of skipping it
    pub disconnect_on_malformed: bool,

    /// Longest a send waits for the outbound queue before failing
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LENGTH,
            outbound_capacity: 32,
            disconnect_on_malformed: false,
            send_timeout: timeout::SEND_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_length < 1024 {
            errors.push("Max frame length too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_length > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame length too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_length
            ));
        }

        if self.outbound_capacity == 0 {
            errors.push("Outbound capacity must be greater than 0".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("action-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            match self.log_file_path.as_deref().map(Path::new) {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            errors.push(format!(
                                "Log file directory does not exist: {}",
                                parent.display()
                            ));
                        }
                    }
                }
                None => errors
                    .push("log_file_path must be specified when log_to_file is true".to_string()),
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Level>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {raw}")))
    }
}
