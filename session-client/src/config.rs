//! Client configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial (or
//! absent) file still yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file was not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend HTTP settings.
    pub api: ApiConfig,
    /// Realtime channel settings.
    pub realtime: RealtimeConfig,
    /// Durable queue settings.
    pub queue: QueueConfig,
    /// Session tracking settings.
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

/// Backend HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Per-request timeout, in milliseconds. Bounds every backend call so
    /// a stalled server never blocks the caller indefinitely.
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.studysync.app".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

/// Realtime channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Socket endpoint.
    pub url: String,
    /// How long to wait for the socket to open, in milliseconds.
    pub connect_timeout_ms: u64,
    /// How long to wait for the authentication acknowledgment.
    pub auth_timeout_ms: u64,
    /// How long to wait for a space-join acknowledgment.
    pub join_timeout_ms: u64,
    /// Keep-alive heartbeat interval while authenticated.
    pub heartbeat_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://realtime.studysync.app".to_string(),
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 10_000,
            join_timeout_ms: 5_000,
            heartbeat_interval_ms: 25_000,
        }
    }
}

/// Durable queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending requests held before the oldest is
    /// evicted.
    pub capacity: usize,
    /// Delivery attempts per request before it is dropped.
    pub max_retries: u32,
    /// Snapshot file for pending requests. `None` keeps the queue
    /// in-memory only.
    pub store_path: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            max_retries: 5,
            store_path: None,
        }
    }
}

/// Session tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between persisted progress heartbeats, in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = ClientConfig::default();
        assert_eq!(config.queue.capacity, 500);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.session.heartbeat_interval_secs, 60);
        assert!(config.realtime.url.starts_with("wss://"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [queue]
            capacity = 50

            [realtime]
            url = "wss://localhost:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 50);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.realtime.url, "wss://localhost:9000");
        assert_eq!(config.realtime.heartbeat_interval_ms, 25_000);
    }

    #[test]
    fn empty_toml_is_valid() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.api.base_url, "https://api.studysync.app");
        assert_eq!(config.api.request_timeout_ms, 15_000);
    }

    #[test]
    fn request_timeout_is_configurable() {
        let config = ClientConfig::from_toml_str(
            r#"
            [api]
            request_timeout_ms = 3000
            "#,
        )
        .unwrap();
        assert_eq!(config.api.request_timeout_ms, 3000);
        assert_eq!(config.api.base_url, "https://api.studysync.app");
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "[session]\nheartbeat_interval_secs = 30\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.session.heartbeat_interval_secs, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            ClientConfig::load("/nonexistent/client.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
