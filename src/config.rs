//! Configuration for broker access, flow control, and topic layout
//!
//! Loaded from TOML. Credentials are never stored in the file itself;
//! the config names environment variables that hold them.

use crate::protocol::validate_client_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub client: ClientSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub flow: FlowSection,
    #[serde(default)]
    pub topics: TopicsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://` or `mqtts://` with optional port
    pub url: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Flow-control budgets.
///
/// `publish_rate` caps outgoing publishes across all callers;
/// `process_rate` is the independent budget the message processor uses
/// when draining the work queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowSection {
    /// Maximum publishes per second (0 = unlimited)
    #[serde(default = "default_publish_rate")]
    pub publish_rate: f64,
    /// Maximum queue drains per second (0 = unlimited)
    #[serde(default = "default_process_rate")]
    pub process_rate: f64,
    /// Bounded work queue capacity; messages arriving on a full queue
    /// are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Default request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_publish_rate() -> f64 {
    100.0
}

fn default_process_rate() -> f64 {
    50.0
}

fn default_queue_capacity() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            publish_rate: default_publish_rate(),
            process_rate: default_process_rate(),
            queue_capacity: default_queue_capacity(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Namespace root all topics live under
    #[serde(default = "default_topic_root")]
    pub root: String,
}

fn default_topic_root() -> String {
    "/mqrpc".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            root: default_topic_root(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ServiceConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client.id)
            .map_err(|e| ConfigError::Invalid(format!("client.id: {e}")))?;

        if !self.broker.url.starts_with("mqtt://") && !self.broker.url.starts_with("mqtts://") {
            return Err(ConfigError::Invalid(format!(
                "broker.url must use mqtt:// or mqtts://, got '{}'",
                self.broker.url
            )));
        }

        if self.flow.publish_rate < 0.0 || self.flow.process_rate < 0.0 {
            return Err(ConfigError::Invalid(
                "flow rates must be non-negative".to_string(),
            ));
        }

        if self.flow.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "flow.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the broker username/password from the configured
    /// environment variables. Missing variables mean anonymous access.
    pub fn broker_credentials(&self) -> Option<(String, String)> {
        let username_env = self.broker.username_env.as_ref()?;
        let username = std::env::var(username_env).ok()?;
        let password = self
            .broker
            .password_env
            .as_ref()
            .and_then(|env_name| std::env::var(env_name).ok())
            .unwrap_or_default();
        Some((username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            client: ClientSection {
                id: "test-client".to_string(),
            },
            broker: BrokerSection {
                url: "mqtt://localhost:1883".to_string(),
                username_env: None,
                password_env: None,
                keep_alive_secs: 60,
            },
            flow: FlowSection::default(),
            topics: TopicsSection::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_flow_defaults() {
        let flow = FlowSection::default();
        assert_eq!(flow.publish_rate, 100.0);
        assert_eq!(flow.process_rate, 50.0);
        assert_eq!(flow.queue_capacity, 64);
        assert_eq!(flow.default_timeout_secs, 5);
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let mut config = test_config();
        config.broker.url = "http://localhost".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_capacity_queue() {
        let mut config = test_config();
        config.flow.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_rate() {
        let mut config = test_config();
        config.flow.publish_rate = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_client_id() {
        let mut config = test_config();
        config.client.id = "bad id".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_minimal_toml_gets_defaults() {
        let toml_str = r#"
            [client]
            id = "sensor-1"

            [broker]
            url = "mqtt://broker.example.com:1883"
        "#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.flow.queue_capacity, 64);
        assert_eq!(config.topics.root, "/mqrpc");
        assert_eq!(config.broker.keep_alive_secs, 60);
    }
}
