//! Notifier configuration.

use delayline_runtime::config::{
    ConfigError, MetricsConfig, ServerConfig, deserialize_duration, parse_duration,
};
use delayline_runtime::{ConsumerConfig, SchedulerConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level notifier configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen addresses.
    pub server: ServerConfig,
    /// Object store and scheduling index.
    pub redis: RedisConfig,
    /// Durable queue.
    pub rabbitmq: RabbitConfig,
    /// Telegram sender.
    pub telegram: TelegramConfig,
    /// Receipt stream; receipts are disabled when absent.
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    /// Scheduler loop.
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Consumer loop.
    #[serde(default)]
    pub consumer: ConsumerSection,
    /// Prometheus endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// `redis` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// `host:port`.
    pub addr: String,
    /// Empty for no authentication.
    #[serde(default)]
    pub password: String,
    /// Database number.
    #[serde(default)]
    pub db: i64,
}

impl RedisConfig {
    /// Connection settings for [`delayline_redis::RedisBackend::new`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `addr` is not `host[:port]`.
    pub fn connection_info(&self) -> Result<delayline_redis::ConnectionInfo, ConfigError> {
        delayline_redis::connection_info(&self.addr, Some(&self.password), self.db)
            .map_err(|e| ConfigError::Invalid(format!("redis.addr: {e}")))
    }
}

/// `rabbitmq` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_amqp_port")]
    pub port: u16,
    /// Username.
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// Queue name.
    pub queue_name: String,
    /// Unacknowledged deliveries the consumer may hold.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

impl RabbitConfig {
    /// Connection settings for the queue adapter.
    #[must_use]
    pub fn settings(&self) -> delayline_rabbitmq::RabbitSettings {
        delayline_rabbitmq::RabbitSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            queue_name: self.queue_name.clone(),
            prefetch: self.prefetch,
        }
    }
}

/// `telegram` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token.
    pub token: String,
    /// Per-request timeout.
    #[serde(
        default = "default_telegram_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
    /// Bot API base URL.
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

/// `kafka` section.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Receipt topic.
    pub topic: String,
    /// Consumer group; unused by the notifier, accepted for symmetry with the
    /// booker's file.
    #[serde(default)]
    pub group_id: Option<String>,
}

/// `scheduler` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Tick interval.
    #[serde(default = "default_tick")]
    pub tick: String,
    /// Ids popped per set per tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            batch_limit: default_batch_limit(),
        }
    }
}

/// `consumer` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumerSection {
    /// Retries before a retryable failure becomes terminal; unbounded when
    /// absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_amqp_port() -> u16 {
    5672
}

fn default_prefetch() -> u16 {
    10
}

fn default_telegram_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_telegram_api() -> String {
    crate::telegram::DEFAULT_API_BASE.to_string()
}

fn default_tick() -> String {
    "1s".to_string()
}

fn default_batch_limit() -> usize {
    100
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
            ("redis.addr", self.redis.addr.as_str()),
            ("rabbitmq.host", self.rabbitmq.host.as_str()),
            ("rabbitmq.username", self.rabbitmq.username.as_str()),
            ("rabbitmq.queue_name", self.rabbitmq.queue_name.as_str()),
            ("telegram.token", self.telegram.token.as_str()),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} is required")));
            }
        }

        self.redis.connection_info()?;

        if let Some(kafka) = &self.kafka {
            if kafka.brokers.trim().is_empty() || kafka.topic.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "kafka.brokers and kafka.topic are required when kafka is configured"
                        .to_string(),
                ));
            }
        }

        if self.telegram.timeout.is_zero() {
            return Err(ConfigError::Invalid("telegram.timeout must be positive".to_string()));
        }
        if self.scheduler.batch_limit == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.batch_limit must be positive".to_string(),
            ));
        }
        if self.scheduler_config()?.tick.is_zero() {
            return Err(ConfigError::Invalid("scheduler.tick must be positive".to_string()));
        }
        Ok(())
    }

    /// Scheduler tuning derived from the `scheduler` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `scheduler.tick` is not a duration.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(SchedulerConfig {
            tick: parse_duration(&self.scheduler.tick)?,
            batch_limit: self.scheduler.batch_limit,
            ..SchedulerConfig::default()
        })
    }

    /// Consumer tuning: the send deadline follows the Telegram timeout.
    #[must_use]
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            send_timeout: self.telegram.timeout,
            max_retries: self.consumer.max_retries,
            ..ConsumerConfig::default()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
server:
  addrs: ["127.0.0.1:8080"]
redis:
  addr: "localhost:6379"
rabbitmq:
  host: "localhost"
  username: "guest"
  password: "guest"
  queue_name: "notifications"
telegram:
  token: "123:abc"
"#;

    fn parse(yaml: &str) -> Config {
        delayline_runtime::config::parse(yaml).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let config = parse(MINIMAL);
        config.validate().unwrap();

        assert_eq!(config.telegram.timeout, Duration::from_secs(10));
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.rabbitmq.port, 5672);
        assert_eq!(config.rabbitmq.prefetch, 10);
        assert!(config.kafka.is_none());
        assert!(config.metrics.enabled);
        assert_eq!(config.consumer.max_retries, None);

        let scheduler = config.scheduler_config().unwrap();
        assert_eq!(scheduler.tick, Duration::from_secs(1));
        assert_eq!(scheduler.batch_limit, 100);
        assert_eq!(config.consumer_config().send_timeout, Duration::from_secs(10));
        let redis = config.redis.connection_info().unwrap();
        assert_eq!(redis.redis.db, 0);
        assert!(redis.redis.password.is_none());
    }

    #[test]
    fn full_file_parses() {
        let yaml = format!(
            "{MINIMAL}kafka:\n  brokers: \"k:9092\"\n  topic: \"receipts\"\nscheduler:\n  tick: \"500ms\"\n  batch_limit: 10\nconsumer:\n  max_retries: 5\nmetrics:\n  enabled: false\n"
        );
        let config = parse(&yaml);
        config.validate().unwrap();

        assert_eq!(config.kafka.as_ref().unwrap().topic, "receipts");
        assert_eq!(config.scheduler_config().unwrap().tick, Duration::from_millis(500));
        assert_eq!(config.consumer_config().max_retries, Some(5));
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn empty_token_is_rejected() {
        let mut config = parse(MINIMAL);
        config.telegram.token = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("telegram.token"));
    }

    #[test]
    fn redis_password_is_passed_through_and_bad_port_is_rejected() {
        let mut config = parse(MINIMAL);
        config.redis.password = "p@ss/w:rd".to_string();
        let info = config.redis.connection_info().unwrap();
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd"));

        config.redis.addr = "localhost:redis".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis.addr"));
    }

    #[test]
    fn bad_tick_is_rejected() {
        let mut config = parse(MINIMAL);
        config.scheduler.tick = "soon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_telegram_timeout_fails_to_parse() {
        let yaml = MINIMAL.replace("token: \"123:abc\"", "token: \"123:abc\"\n  timeout: \"ten\"");
        assert!(delayline_runtime::config::parse::<Config>(&yaml).is_err());
    }
}
