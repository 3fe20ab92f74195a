//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `modlink` binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModlinkError, Result};
use crate::protocol::{CapabilityRequirements, CapabilitySupport};
use crate::transport::DEFAULT_CHANNEL_CAPACITY;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Relay loop tuning
    #[serde(default)]
    pub relay: RelayConfig,

    /// Session teardown
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Known front ends
    #[serde(default)]
    pub interfaces: Vec<InterfaceDescriptor>,

    /// Known back ends
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ModlinkError::Config(format!("Failed to read config file: {e}")))?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("MODLINK_READ_TIMEOUT_MS") {
            config.relay.read_timeout_ms = Some(ms);
        }
        if let Some(bytes) = env_parse("MODLINK_MAX_MESSAGE_BYTES") {
            config.relay.max_message_bytes = bytes;
        }
        if let Some(ms) = env_parse("MODLINK_SHUTDOWN_TIMEOUT_MS") {
            config.lifecycle.shutdown_timeout_ms = ms;
        }
        if let Ok(level) = std::env::var("MODLINK_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("MODLINK_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    /// Default config file location (`<config dir>/modlink/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("modlink").join("config.toml"))
    }

    /// File (explicit path, else the default path if it exists) overlaid with env.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(default)?,
                _ => Self::default(),
            },
        };
        Ok(base.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(self, other: Self) -> Self {
        let relay_default = RelayConfig::default();
        let lifecycle_default = LifecycleConfig::default();
        let logging_default = LoggingConfig::default();

        Self {
            relay: RelayConfig {
                read_timeout_ms: other.relay.read_timeout_ms.or(self.relay.read_timeout_ms),
                backoff_initial_ms: pick(
                    other.relay.backoff_initial_ms,
                    self.relay.backoff_initial_ms,
                    relay_default.backoff_initial_ms,
                ),
                backoff_max_ms: pick(
                    other.relay.backoff_max_ms,
                    self.relay.backoff_max_ms,
                    relay_default.backoff_max_ms,
                ),
                max_message_bytes: pick(
                    other.relay.max_message_bytes,
                    self.relay.max_message_bytes,
                    relay_default.max_message_bytes,
                ),
                channel_capacity: pick(
                    other.relay.channel_capacity,
                    self.relay.channel_capacity,
                    relay_default.channel_capacity,
                ),
            },
            lifecycle: LifecycleConfig {
                shutdown_timeout_ms: pick(
                    other.lifecycle.shutdown_timeout_ms,
                    self.lifecycle.shutdown_timeout_ms,
                    lifecycle_default.shutdown_timeout_ms,
                ),
            },
            logging: LoggingConfig {
                level: pick(other.logging.level, self.logging.level, logging_default.level),
                format: pick(
                    other.logging.format,
                    self.logging.format,
                    logging_default.format,
                ),
            },
            interfaces: if other.interfaces.is_empty() {
                self.interfaces
            } else {
                other.interfaces
            },
            models: if other.models.is_empty() {
                self.models
            } else {
                other.models
            },
        }
    }

    /// Front-end descriptor by id
    pub fn interface(&self, id: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|d| d.id == id)
    }

    /// Back-end descriptor by id
    pub fn model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|d| d.id == id)
    }
}

fn pick<T: PartialEq>(other: T, current: T, default: T) -> T {
    if other != default {
        other
    } else {
        current
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Relay loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Optional bound on a single read; expiry re-checks shutdown and retries
    pub read_timeout_ms: Option<u64>,

    /// First pause after a transient error
    pub backoff_initial_ms: u64,

    /// Backoff ceiling
    pub backoff_max_ms: u64,

    /// Largest accepted line, terminator included
    pub max_message_bytes: usize,

    /// Buffer size of each in-process duplex channel
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            backoff_initial_ms: 50,
            backoff_max_ms: 1000,
            max_message_bytes: 1024 * 1024, // 1 MiB
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Backoff before the `attempt`-th retry (1-based), doubling up to the ceiling
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms.max(self.backoff_initial_ms));
        Duration::from_millis(ms)
    }
}

/// Session teardown configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long `close()` waits for relay tasks before abandoning them
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 2000,
        }
    }
}

impl LifecycleConfig {
    /// Shutdown timeout as a duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,

    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Whether JSON output was requested
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// A front end known to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Stable registry id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// One-line description
    #[serde(default)]
    pub description: String,
    /// Capabilities the front end cannot work without
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Capabilities the front end can use if present
    #[serde(default)]
    pub optional_capabilities: Vec<String>,
}

impl InterfaceDescriptor {
    /// Declared requirements
    pub fn requirements(&self) -> CapabilityRequirements {
        CapabilityRequirements::new(
            self.required_capabilities.iter().cloned(),
            self.optional_capabilities.iter().cloned(),
        )
    }
}

/// A back end known to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Stable registry id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// One-line description
    #[serde(default)]
    pub description: String,
    /// Advertised support map
    #[serde(default)]
    pub capabilities: CapabilitySupport,
}
