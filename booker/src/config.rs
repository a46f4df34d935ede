//! Booker configuration.

use delayline_runtime::config::{ConfigError, MetricsConfig, ServerConfig, deserialize_duration};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level booker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen addresses.
    pub server: ServerConfig,
    /// Relational store.
    pub storage: StorageConfig,
    /// Receipt stream the cancellation consumer reads.
    pub kafka: KafkaConfig,
    /// Base URL of the notifier API.
    pub notif_addr: String,
    /// Timeout for each notifier request.
    #[serde(
        default = "default_notifier_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub notifier_timeout: Duration,
    /// Prometheus endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// `storage` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Primary DSN; every transaction runs here.
    pub master_dsn: String,
    /// Read replicas. Parsed and checked, not connected.
    #[serde(default)]
    pub slave_dsns: Vec<String>,
    /// Pool size for the primary.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// `kafka` section.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Receipt topic.
    pub topic: String,
    /// Consumer group.
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

const fn default_notifier_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_connections() -> u32 {
    10
}

fn default_group_id() -> String {
    "booker".to_string()
}

impl Config {
    /// Load from `path` and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is unreadable, malformed or fails
    /// [`Config::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = delayline_runtime::config::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check required values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;

        let required = [
            ("storage.master_dsn", self.storage.master_dsn.as_str()),
            ("kafka.brokers", self.kafka.brokers.as_str()),
            ("kafka.topic", self.kafka.topic.as_str()),
            ("kafka.group_id", self.kafka.group_id.as_str()),
            ("notif_addr", self.notif_addr.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} is required")));
            }
        }

        if let Some(position) = self.storage.slave_dsns.iter().position(|dsn| dsn.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "storage.slave_dsns[{position}] is empty"
            )));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_connections must be positive".to_string(),
            ));
        }
        if !(self.notif_addr.starts_with("http://") || self.notif_addr.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "notif_addr must be an http(s) URL, got {:?}",
                self.notif_addr
            )));
        }
        if self.notifier_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "notifier_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
server:
  addrs: ["127.0.0.1:8081"]
storage:
  master_dsn: "postgres://booker@localhost/booker"
kafka:
  brokers: "localhost:9092"
  topic: "notifications"
notif_addr: "http://localhost:8080"
"#;

    fn parse(yaml: &str) -> Config {
        delayline_runtime::config::parse(yaml).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let config = parse(MINIMAL);
        config.validate().unwrap();

        assert!(config.storage.slave_dsns.is_empty());
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.kafka.group_id, "booker");
        assert_eq!(config.notifier_timeout, Duration::from_secs(10));
        assert!(config.metrics.enabled);
    }

    #[test]
    fn replicas_and_overrides_parse() {
        let yaml = MINIMAL.replace(
            "  master_dsn: \"postgres://booker@localhost/booker\"",
            "  master_dsn: \"postgres://booker@primary/booker\"\n  slave_dsns: [\"postgres://booker@replica/booker\"]\n  max_connections: 4",
        ) + "notifier_timeout: \"2s\"\nmetrics:\n  enabled: false\n";
        let config = parse(&yaml);
        config.validate().unwrap();

        assert_eq!(config.storage.slave_dsns.len(), 1);
        assert_eq!(config.storage.max_connections, 4);
        assert_eq!(config.notifier_timeout, Duration::from_secs(2));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn missing_dsn_is_rejected() {
        let mut config = parse(MINIMAL);
        config.storage.master_dsn = " ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.master_dsn"));
    }

    #[test]
    fn empty_replica_is_rejected() {
        let mut config = parse(MINIMAL);
        config.storage.slave_dsns = vec!["postgres://r1/booker".to_string(), String::new()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("slave_dsns[1]"));
    }

    #[test]
    fn notifier_address_needs_a_scheme() {
        let mut config = parse(MINIMAL);
        config.notif_addr = "localhost:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn kafka_section_is_required() {
        let yaml = MINIMAL.replace(
            "kafka:\n  brokers: \"localhost:9092\"\n  topic: \"notifications\"\n",
            "",
        );
        assert!(delayline_runtime::config::parse::<Config>(&yaml).is_err());
    }
}
