//! # Configuration Management
//!
//! Centralized configuration for secure channels.
//!
//! This module provides structured configuration for the channel codec, the
//! replay policy, the retransmission adapter and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - The key may be supplied as hex in `channel.key_hex`; keep such files private
//! - Tags shorter than 8 bytes are refused
//! - Disabling replay escalation hides sustained replay attempts from callers

use crate::core::packet::{DEFAULT_MAX_PAYLOAD, MAX_PAYLOAD_LIMIT};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{SharedKey, DEFAULT_MAC_LEN, MAX_MAC_LEN, MIN_MAC_LEN};
use crate::utils::freshness::FreshnessPolicy;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Consecutive replay rejections after which a receive call gives up
pub const DEFAULT_REPLAY_ESCALATION: u32 = 16;

/// Retransmission rounds before a send is abandoned
pub const DEFAULT_MAX_RETRANSMIT_ROUNDS: u32 = 20;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProtocolConfig {
    /// Key, framing and read settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Replay defence settings
    #[serde(default)]
    pub freshness: FreshnessConfig,

    /// Retransmission adapter settings
    #[serde(default)]
    pub reliability: ReliabilityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(key) = std::env::var("SECURE_FRAME_KEY_HEX") {
            config.channel.key_hex = Some(key);
        }

        if let Ok(size) = std::env::var("SECURE_FRAME_MAX_PAYLOAD") {
            if let Ok(val) = size.parse::<usize>() {
                config.channel.max_payload = val;
            }
        }

        if let Ok(len) = std::env::var("SECURE_FRAME_MAC_LEN") {
            if let Ok(val) = len.parse::<usize>() {
                config.channel.mac_len = val;
            }
        }

        if let Ok(skew) = std::env::var("SECURE_FRAME_MAX_SKEW_SECS") {
            if let Ok(val) = skew.parse::<u64>() {
                config.freshness.policy = FreshnessPolicy::timestamp(val);
            }
        }

        if let Ok(capacity) = std::env::var("SECURE_FRAME_NONCE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.freshness.policy = FreshnessPolicy::nonce(val);
            }
        }

        if let Ok(timeout) = std::env::var("SECURE_FRAME_ACK_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.reliability.ack_timeout = Duration::from_millis(val);
            }
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

    /// Resolve the configured pre-shared key
    pub fn shared_key(&self) -> Result<SharedKey> {
        match &self.channel.key_hex {
            Some(encoded) => SharedKey::from_hex(encoded)
                .map_err(|e| ProtocolError::ConfigError(format!("Invalid channel.key_hex: {e}"))),
            None => Err(ProtocolError::ConfigError(
                "channel.key_hex is not set".to_string(),
            )),
        }
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.channel.validate());
        errors.extend(self.freshness.validate());
        errors.extend(self.reliability.validate());
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

/// Key, framing and read settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Pre-shared AES-128 key as 32 hex characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hex: Option<String>,

    /// Maximum plaintext bytes per fragment
    pub max_payload: usize,

    /// Truncated MAC length in bytes
    pub mac_len: usize,

    /// Read timeout for a whole message; zero waits indefinitely
    #[serde(with = "duration_serde")]
    pub recv_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            key_hex: None,
            max_payload: DEFAULT_MAX_PAYLOAD,
            mac_len: DEFAULT_MAC_LEN,
            recv_timeout: Duration::ZERO,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(ref key) = self.key_hex {
            if let Err(e) = SharedKey::from_hex(key) {
                errors.push(format!("Invalid channel key: {e}"));
            }
        }

        if self.max_payload == 0 {
            errors.push("Max payload cannot be 0".to_string());
        } else if self.max_payload > MAX_PAYLOAD_LIMIT {
            errors.push(format!(
                "Max payload too large: {} bytes (maximum: {MAX_PAYLOAD_LIMIT})",
                self.max_payload
            ));
        }

        if self.mac_len < MIN_MAC_LEN || self.mac_len > MAX_MAC_LEN {
            errors.push(format!(
                "Invalid MAC length: {} (valid range: {MIN_MAC_LEN}-{MAX_MAC_LEN})",
                self.mac_len
            ));
        }

        errors
    }
}

/// Replay defence settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Consecutive replay rejections before a receive fails; zero disables
    pub replay_escalation_threshold: u32,

    /// Policy and its parameter
    #[serde(default)]
    pub policy: FreshnessPolicy,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            policy: FreshnessPolicy::default(),
            replay_escalation_threshold: DEFAULT_REPLAY_ESCALATION,
        }
    }
}

impl FreshnessConfig {
    /// Validate freshness configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match &self.policy {
            FreshnessPolicy::Timestamp {
                max_skew_secs,
                window_capacity,
            } => {
                if *max_skew_secs == 0 {
                    errors.push("Max skew must be at least 1 second".to_string());
                } else if *max_skew_secs > 300 {
                    errors.push(format!(
                        "Max skew too long: {max_skew_secs}s (maximum: 300s)"
                    ));
                }
                if *window_capacity == 0 {
                    errors.push("Window capacity must be greater than 0".to_string());
                }
            }
            FreshnessPolicy::Nonce { capacity } => {
                if *capacity == 0 {
                    errors.push("Nonce cache capacity must be greater than 0".to_string());
                } else if *capacity > 10_000_000 {
                    errors.push(format!(
                        "Nonce cache capacity very high: {capacity} (ensure memory can support this)"
                    ));
                }
            }
        }

        errors
    }
}

/// Retransmission adapter settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// How long to wait for ACK/NACK replies per round
    #[serde(with = "duration_serde")]
    pub ack_timeout: Duration,

    /// Rounds before a send gives up
    pub max_retransmit_rounds: u32,

    /// How long a receiver answers END/duplicates after sending DONE
    #[serde(with = "duration_serde")]
    pub done_linger: Duration,

    /// Whether to NACK frames that fail authentication
    pub nack_on_auth_failure: bool,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            ack_timeout: timeout::ACK_TIMEOUT,
            max_retransmit_rounds: DEFAULT_MAX_RETRANSMIT_ROUNDS,
            done_linger: timeout::DONE_LINGER,
            nack_on_auth_failure: false,
        }
    }
}

impl ReliabilityConfig {
    /// Validate reliability configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ack_timeout.as_millis() < 10 {
            errors.push("ACK timeout too short (minimum: 10ms)".to_string());
        } else if self.ack_timeout.as_secs() > 60 {
            errors.push("ACK timeout too long (maximum: 60s)".to_string());
        }

        if self.max_retransmit_rounds == 0 {
            errors.push("Max retransmit rounds must be greater than 0".to_string());
        }

        if self.done_linger > self.ack_timeout * self.max_retransmit_rounds.max(1) {
            errors.push("DONE linger longer than the sender's whole retry budget".to_string());
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

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("secure-frame"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
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
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
