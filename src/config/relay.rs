//! Relay configuration

use serde::Deserialize;
use std::time::Duration;

use crate::domain::outbox::{MessageIdentity, RetryPolicy};

use super::error::ValidationError;

const MAX_WORKERS: usize = 64;

/// PostgreSQL truncates identifiers longer than this.
const MAX_CHANNEL_LEN: usize = 63;

/// Delivery, scheduling and lease settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Publish attempts before a row becomes `failed`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure, in milliseconds; doubles per failure
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any single retry delay, in seconds
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Fallback poll period, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Subscribe to insert notifications; polling alone when false
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,

    /// LISTEN channel fed by the insert trigger
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,

    /// Wait before re-subscribing after a lost notification stream, in seconds
    #[serde(default = "default_notify_reconnect_secs")]
    pub notify_reconnect_secs: u64,

    /// Concurrent claim loops per drain
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Age after which a `publishing` lease is reclaimed, in seconds; 0 disables
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Lease sweep period, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// `producer` attribute on outbound messages
    #[serde(default = "default_producer")]
    pub producer: String,

    /// `version` attribute on outbound messages
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

impl RelayConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn notify_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.notify_reconnect_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Process-wide retry policy built from the backoff settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff_base(), self.backoff_max())
    }

    /// Identity tags stamped on every outbound message
    pub fn message_identity(&self) -> MessageIdentity {
        MessageIdentity::new(self.producer.clone(), self.schema_version.clone())
    }

    /// Validate relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        if self.backoff_base_ms == 0 {
            return Err(ValidationError::InvalidBackoffBase);
        }
        if self.backoff_max() < self.backoff_base() {
            return Err(ValidationError::InvalidBackoffCap);
        }
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::InvalidPollInterval);
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ValidationError::InvalidWorkerCount(self.workers));
        }
        if self.lease_timeout_secs > 0 && self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidSweepInterval);
        }
        if !is_valid_channel(&self.notify_channel) {
            return Err(ValidationError::InvalidNotifyChannel(
                self.notify_channel.clone(),
            ));
        }
        if self.producer.trim().is_empty() {
            return Err(ValidationError::MissingRequired("OUTBOX_RELAY__RELAY__PRODUCER"));
        }
        if self.schema_version.trim().is_empty() {
            return Err(ValidationError::MissingRequired(
                "OUTBOX_RELAY__RELAY__SCHEMA_VERSION",
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            notifications_enabled: default_notifications_enabled(),
            notify_channel: default_notify_channel(),
            notify_reconnect_secs: default_notify_reconnect_secs(),
            workers: default_workers(),
            lease_timeout_secs: default_lease_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            producer: default_producer(),
            schema_version: default_schema_version(),
        }
    }
}

/// Lowercase unquoted identifier, the form the migration's trigger uses.
fn is_valid_channel(channel: &str) -> bool {
    let mut chars = channel.chars();
    let starts_well = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    starts_well
        && channel.len() <= MAX_CHANNEL_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_notifications_enabled() -> bool {
    true
}

fn default_notify_channel() -> String {
    "outbox_events".to_string()
}

fn default_notify_reconnect_secs() -> u64 {
    5
}

fn default_workers() -> usize {
    1
}

fn default_lease_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_producer() -> String {
    "outbox-relay".to_string()
}

fn default_schema_version() -> String {
    "1".to_string()
}
