//! Redis configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Redis configuration for the stream publisher
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Per-command timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Prepended to the topic to form the stream key
    #[serde(default = "default_stream_prefix")]
    pub stream_prefix: String,

    /// Approximate cap on stream length (`XADD MAXLEN ~`); unbounded when unset
    #[serde(default)]
    pub stream_max_len: Option<usize>,
}

impl RedisConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate Redis configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("OUTBOX_RELAY__REDIS__URL"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ValidationError::InvalidRedisUrl);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidRedisTimeout);
        }
        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout(),
            stream_prefix: default_stream_prefix(),
            stream_max_len: None,
        }
    }
}

fn default_timeout() -> u64 {
    5
}

fn default_stream_prefix() -> String {
    "outbox:".to_string()
}
