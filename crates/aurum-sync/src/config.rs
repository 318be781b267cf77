//! # Sync Configuration
//!
//! Configuration management for the realtime sync client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     AURUM_SERVER_URL=https://shop.example.com                           │
//! │     AURUM_POLL_INTERVAL_SECS=30                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/storefront/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.aurum.storefront/sync.toml (mac)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     3 reconnect attempts, 2s base backoff, 10s poll interval            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [server]
//! base_url = "https://shop.example.com"
//! channel_url = "wss://shop.example.com/realtime"
//! health_path = "/api/health"
//!
//! [channel]
//! connect_timeout_secs = 15
//! probe_timeout_secs = 5
//! base_delay_ms = 2000
//! max_attempts = 3
//!
//! [poll]
//! interval_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Server Settings
// =============================================================================

/// Where the backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Base HTTP(S) URL of the backend, no trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket URL of the realtime channel.
    /// Derived from `base_url` when omitted (http -> ws, https -> wss).
    #[serde(default)]
    pub channel_url: Option<String>,

    /// Path of the reachability probe endpoint.
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_health_path() -> String {
    "/api/health".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            base_url: default_base_url(),
            channel_url: None,
            health_path: default_health_path(),
        }
    }
}

// =============================================================================
// Channel Settings
// =============================================================================

/// WebSocket channel behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Health probe timeout (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Base reconnect delay (milliseconds). Doubles on every failed attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Maximum reconnect attempts before the channel gives up and waits
    /// for an explicit reset.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval between keepalive pings on an open channel (seconds).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_connect_timeout() -> u64 {
    15
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_base_delay() -> u64 {
    2000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_ping_interval() -> u64 {
    30
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            connect_timeout_secs: default_connect_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            base_delay_ms: default_base_delay(),
            max_attempts: default_max_attempts(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl ChannelSettings {
    /// Channel handshake timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Health probe timeout as a `Duration`.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Keepalive ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

// =============================================================================
// Poll Settings
// =============================================================================

/// Differential polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// Interval between scheduled polls per domain (seconds).
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_secs: default_poll_interval(),
        }
    }
}

impl PollSettings {
    /// Poll interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory for the embedded cart database.
    /// Defaults to the platform data dir when omitted.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete realtime sync configuration.
///
/// ## Example Config File
/// ```toml
/// [server]
/// base_url = "https://shop.example.com"
/// health_path = "/api/health"
///
/// [channel]
/// connect_timeout_secs = 15
/// base_delay_ms = 2000
/// max_attempts = 3
///
/// [poll]
/// interval_secs = 10
///
/// [storage]
/// data_dir = "/var/lib/aurum"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Backend location.
    #[serde(default)]
    pub server: ServerSettings,

    /// WebSocket channel behavior.
    #[serde(default)]
    pub channel: ChannelSettings,

    /// Differential polling behavior.
    #[serde(default)]
    pub poll: PollSettings,

    /// Local persistence.
    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        // Try to load from config file
        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        // Validate the configuration
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let base = url::Url::parse(&self.server.base_url)?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must use http:// or https://, got: {}",
                self.server.base_url
            )));
        }

        if let Some(ref channel_url) = self.server.channel_url {
            let channel = url::Url::parse(channel_url)?;
            if channel.scheme() != "ws" && channel.scheme() != "wss" {
                return Err(SyncError::InvalidUrl(format!(
                    "Channel URL must use ws:// or wss://, got: {channel_url}"
                )));
            }
        }

        if self.channel.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "base_delay_ms must be greater than 0".into(),
            ));
        }

        if self.channel.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.poll.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        // Server URL
        if let Ok(url) = std::env::var("AURUM_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.base_url = url;
        }

        // Channel URL
        if let Ok(url) = std::env::var("AURUM_CHANNEL_URL") {
            debug!(url = %url, "Overriding channel URL from environment");
            self.server.channel_url = Some(url);
        }

        // Health path
        if let Ok(path) = std::env::var("AURUM_HEALTH_PATH") {
            self.server.health_path = path;
        }

        // Reconnect attempts
        if let Ok(attempts) = std::env::var("AURUM_MAX_ATTEMPTS") {
            if let Ok(n) = attempts.parse::<u32>() {
                self.channel.max_attempts = n;
            }
        }

        // Base backoff delay
        if let Ok(delay) = std::env::var("AURUM_BASE_DELAY_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                self.channel.base_delay_ms = ms;
            }
        }

        // Poll interval
        if let Ok(interval) = std::env::var("AURUM_POLL_INTERVAL_SECS") {
            if let Ok(secs) = interval.parse::<u64>() {
                debug!(secs, "Overriding poll interval from environment");
                self.poll.interval_secs = secs;
            }
        }

        // Data directory
        if let Ok(dir) = std::env::var("AURUM_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "aurum", "storefront").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Derived Values
    // =========================================================================

    /// Full URL of the health probe endpoint.
    pub fn health_url(&self) -> String {
        format!(
            "{}{}",
            self.server.base_url.trim_end_matches('/'),
            self.server.health_path
        )
    }

    /// WebSocket URL of the realtime channel.
    ///
    /// Falls back to rewriting the base URL scheme when no explicit channel
    /// URL is configured.
    pub fn channel_url(&self) -> String {
        match &self.server.channel_url {
            Some(url) => url.clone(),
            None => {
                let base = self.server.base_url.trim_end_matches('/');
                let rewritten = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{}", rest)
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{}", rest)
                } else {
                    base.to_string()
                };
                format!("{}/realtime", rewritten)
            }
        }
    }

    /// Base HTTP URL for REST fetches and cart mirrors.
    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    /// Directory for the embedded cart database.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.data_dir.clone().or_else(|| {
            directories::ProjectDirs::from("com", "aurum", "storefront")
                .map(|dirs| dirs.data_dir().join("cart-db"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.channel.max_attempts, 3);
        assert_eq!(config.channel.base_delay_ms, 2000);
        assert_eq!(config.poll.interval_secs, 10);
        assert_eq!(config.server.health_path, "/api/health");
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());

        // Non-HTTP server URL should fail
        config.server.base_url = "ftp://shop.example.com".to_string();
        assert!(config.validate().is_err());

        // Non-WS channel URL should fail
        config.server.base_url = "https://shop.example.com".to_string();
        config.server.channel_url = Some("https://shop.example.com/realtime".to_string());
        assert!(config.validate().is_err());

        // Valid WebSocket URL should pass
        config.server.channel_url = Some("wss://shop.example.com/realtime".to_string());
        assert!(config.validate().is_ok());

        // Zero backoff should fail
        config.channel.base_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_health_url_joins_path() {
        let mut config = SyncConfig::default();
        config.server.base_url = "https://shop.example.com/".to_string();
        assert_eq!(config.health_url(), "https://shop.example.com/api/health");
    }

    #[test]
    fn test_channel_url_derived_from_base() {
        let mut config = SyncConfig::default();
        config.server.base_url = "https://shop.example.com".to_string();
        assert_eq!(config.channel_url(), "wss://shop.example.com/realtime");

        config.server.base_url = "http://localhost:3000".to_string();
        assert_eq!(config.channel_url(), "ws://localhost:3000/realtime");

        config.server.channel_url = Some("wss://rt.example.com/ws".to_string());
        assert_eq!(config.channel_url(), "wss://rt.example.com/ws");
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[channel]"));
        assert!(toml_str.contains("[poll]"));
    }
}
