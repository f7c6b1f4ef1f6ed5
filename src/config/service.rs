//! Service configuration

use serde::Deserialize;

/// Process-level settings for the relay binary
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Environment name
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Rust log filter directive, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name recorded in startup logs, useful with several relay instances
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

/// Application environment
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl ServiceConfig {
    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Production logs are JSON lines; everything else is human readable.
    pub fn json_logs(&self) -> bool {
        self.is_production()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            instance_name: default_instance_name(),
        }
    }
}

fn default_environment() -> Environment {
    Environment::Development
}

fn default_log_level() -> String {
    "info,outbox_relay=debug,sqlx=warn".to_string()
}

fn default_instance_name() -> String {
    "outbox-relay".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.log_level, "info,outbox_relay=debug,sqlx=warn");
        assert_eq!(config.instance_name, "outbox-relay");
    }

    #[test]
    fn test_json_logs_only_in_production() {
        let mut config = ServiceConfig::default();
        assert!(!config.json_logs());

        config.environment = Environment::Staging;
        assert!(!config.json_logs());

        config.environment = Environment::Production;
        assert!(config.is_production());
        assert!(config.json_logs());
    }
}
