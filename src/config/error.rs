//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error(
        "Pool max_connections ({max_connections}) cannot serve {workers} relay workers plus listener and sweeper"
    )]
    PoolTooSmallForWorkers { max_connections: u32, workers: usize },

    #[error("Redis timeout must be greater than zero")]
    InvalidRedisTimeout,

    #[error("max_attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("backoff_base_ms must be greater than zero")]
    InvalidBackoffBase,

    #[error("backoff_max_secs must not be shorter than backoff_base_ms")]
    InvalidBackoffCap,

    #[error("poll_interval_secs must be greater than zero")]
    InvalidPollInterval,

    #[error("workers must be between 1 and 64, got {0}")]
    InvalidWorkerCount(usize),

    #[error("sweep_interval_secs must be greater than zero when lease sweeping is enabled")]
    InvalidSweepInterval,

    #[error("Invalid notification channel name: {0}")]
    InvalidNotifyChannel(String),
}
