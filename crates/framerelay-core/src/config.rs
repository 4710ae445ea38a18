use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Tuning for one relay instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on bytes handed to the transport per write.
    #[serde(alias = "chunkSize")]
    pub chunk_size: usize,
    /// Consecutive failed connect attempts tolerated before giving up.
    #[serde(alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,
    #[serde(alias = "reconnectDelayMs")]
    pub reconnect_delay_ms: u64,
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
    /// Reconnect on failure without waiting for the next submitted frame.
    #[serde(alias = "autoReconnect")]
    pub auto_reconnect: bool,
    #[serde(alias = "contentType")]
    pub content_type: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10 * 1024,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            connect_timeout_ms: 5_000,
            auto_reconnect: true,
            content_type: "image/jpeg".to_owned(),
        }
    }
}

impl RelayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid { reason: "chunk_size must be > 0".into() });
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "max_reconnect_attempts must be > 0".into(),
            });
        }
        if self.content_type.trim().is_empty() || self.content_type.contains(['\r', '\n']) {
            return Err(ConfigError::Invalid {
                reason: format!("content_type {:?} is not a valid header value", self.content_type),
            });
        }
        Ok(())
    }
}
