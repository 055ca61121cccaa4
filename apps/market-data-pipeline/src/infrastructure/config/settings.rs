//! Pipeline Configuration Settings
//!
//! Configuration types for the market data pipeline, loaded from environment
//! variables. Every value is read and validated once at startup; a value that
//! is present but unparsable is an error rather than a silent default.

use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{
    OrchestratorConfig, PublisherConfig, ReaderConfig, RetryConfig, SupervisorPolicy,
};
use crate::domain::topic::{
    MARKET_DATA_PARTITIONS, MARKET_DATA_TOPIC, TRADING_MODEL_GROUP, TopicSpec,
};
use crate::infrastructure::kafka::parse_bootstrap_servers;

/// Default upstream quote endpoint.
pub const DEFAULT_QUOTE_API_URL: &str = "https://finnhub.io/api/v1/quote";

/// Broker implementation backing the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerBackend {
    /// Kafka cluster via librdkafka.
    #[default]
    Kafka,
    /// In-process broker for local runs and tests.
    Memory,
}

impl BrokerBackend {
    /// Get the backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for BrokerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kafka" => Ok(Self::Kafka),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown broker backend '{other}', expected kafka or memory")),
        }
    }
}

/// Quote API credential.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
}

impl ApiCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker implementation.
    pub backend: BrokerBackend,
    /// Validated `host:port` bootstrap addresses.
    pub bootstrap_servers: Vec<String>,
    /// Application identity reported to the cluster.
    pub client_id: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Kafka,
            bootstrap_servers: vec!["localhost:9092".to_string()],
            client_id: "market-data-pipeline".to_string(),
        }
    }
}

/// Topic and consumer group settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSettings {
    /// Topic name.
    pub name: String,
    /// Partition count used at creation.
    pub partitions: i32,
    /// Replication factor used at creation.
    pub replication_factor: i32,
    /// Reader consumer group.
    pub consumer_group: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            name: MARKET_DATA_TOPIC.to_string(),
            partitions: MARKET_DATA_PARTITIONS,
            replication_factor: 1,
            consumer_group: TRADING_MODEL_GROUP.to_string(),
        }
    }
}

/// Publisher and upstream API settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Ticker to poll.
    pub symbol: String,
    /// Time between polls.
    pub poll_interval: Duration,
    /// Quote endpoint.
    pub quote_api_url: String,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Publish retries per cycle after the first attempt.
    pub max_retries: u32,
    /// First publish backoff delay.
    pub retry_initial_delay: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            symbol: "AAPL".to_string(),
            poll_interval: Duration::from_millis(1000),
            quote_api_url: DEFAULT_QUOTE_API_URL.to_string(),
            request_timeout: Duration::from_millis(5000),
            max_retries: 2,
            retry_initial_delay: Duration::from_millis(100),
        }
    }
}

/// Supervisor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorMode {
    /// Restart failed tasks within a budget.
    #[default]
    Restart,
    /// Stop everything when a task fails.
    Shutdown,
}

impl FromStr for SupervisorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(format!(
                "unknown supervisor policy '{other}', expected restart or shutdown"
            )),
        }
    }
}

/// Supervision and shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// What to do when a task fails.
    pub mode: SupervisorMode,
    /// Restart budget per task.
    pub max_restarts: u32,
    /// Delay before a restart.
    pub restart_delay: Duration,
    /// Drain budget on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            mode: SupervisorMode::Restart,
            max_restarts: 5,
            restart_delay: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SupervisorSettings {
    /// Policy handed to the orchestrator.
    #[must_use]
    pub const fn policy(&self) -> SupervisorPolicy {
        match self.mode {
            SupervisorMode::Restart => SupervisorPolicy::Restart {
                max_restarts: self.max_restarts,
                delay: self.restart_delay,
            },
            SupervisorMode::Shutdown => SupervisorPolicy::ShutdownAll,
        }
    }
}

/// Fan-out hub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Capacity of the market data broadcast channel.
    pub capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Quote API credential.
    pub credentials: ApiCredentials,
    /// Broker connection settings.
    pub broker: BrokerSettings,
    /// Topic settings.
    pub topic: TopicSettings,
    /// Publisher settings.
    pub publisher: PublisherSettings,
    /// Supervision settings.
    pub supervisor: SupervisorSettings,
    /// Fan-out hub settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `API_KEY` is missing or empty, or if any variable
    /// is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env
            .raw("API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("API_KEY".to_string()));
        }

        let broker_defaults = BrokerSettings::default();
        let bootstrap_servers = match env.value("KAFKA_BROKERS") {
            Some(list) => parse_bootstrap_servers(&list).map_err(|e| ConfigError::Invalid {
                key: "KAFKA_BROKERS".to_string(),
                reason: e.to_string(),
            })?,
            None => broker_defaults.bootstrap_servers,
        };
        let broker = BrokerSettings {
            backend: env.parse("BROKER_BACKEND", broker_defaults.backend)?,
            bootstrap_servers,
            client_id: env.string("KAFKA_CLIENT_ID", broker_defaults.client_id),
        };

        let topic_defaults = TopicSettings::default();
        let topic = TopicSettings {
            name: env.string("MARKET_DATA_TOPIC", topic_defaults.name),
            partitions: env.parse("MARKET_DATA_PARTITIONS", topic_defaults.partitions)?,
            replication_factor: env
                .parse("MARKET_DATA_REPLICATION", topic_defaults.replication_factor)?,
            consumer_group: env.string("CONSUMER_GROUP_ID", topic_defaults.consumer_group),
        };
        if topic.partitions < 1 {
            return Err(ConfigError::invalid("MARKET_DATA_PARTITIONS", "must be at least 1"));
        }
        if topic.replication_factor < 1 {
            return Err(ConfigError::invalid("MARKET_DATA_REPLICATION", "must be at least 1"));
        }

        let publisher_defaults = PublisherSettings::default();
        let publisher = PublisherSettings {
            symbol: env.string("QUOTE_SYMBOL", publisher_defaults.symbol),
            poll_interval: env.millis("POLL_INTERVAL_MS", publisher_defaults.poll_interval)?,
            quote_api_url: env.string("QUOTE_API_URL", publisher_defaults.quote_api_url),
            request_timeout: env
                .millis("QUOTE_REQUEST_TIMEOUT_MS", publisher_defaults.request_timeout)?,
            max_retries: env.parse("PUBLISH_MAX_RETRIES", publisher_defaults.max_retries)?,
            retry_initial_delay: env
                .millis("PUBLISH_RETRY_INITIAL_MS", publisher_defaults.retry_initial_delay)?,
        };
        if publisher.poll_interval.is_zero() {
            return Err(ConfigError::invalid("POLL_INTERVAL_MS", "must be greater than 0"));
        }
        if publisher.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "QUOTE_REQUEST_TIMEOUT_MS",
                "must be greater than 0",
            ));
        }

        let supervisor_defaults = SupervisorSettings::default();
        let supervisor = SupervisorSettings {
            mode: env.parse("SUPERVISOR_POLICY", supervisor_defaults.mode)?,
            max_restarts: env.parse("SUPERVISOR_MAX_RESTARTS", supervisor_defaults.max_restarts)?,
            restart_delay: env
                .millis("SUPERVISOR_RESTART_DELAY_MS", supervisor_defaults.restart_delay)?,
            shutdown_timeout: env
                .secs("SHUTDOWN_TIMEOUT_SECS", supervisor_defaults.shutdown_timeout)?,
        };

        let broadcast = BroadcastSettings {
            capacity: env.parse("MARKET_DATA_HUB_CAPACITY", BroadcastSettings::default().capacity)?,
        };
        if broadcast.capacity == 0 {
            return Err(ConfigError::invalid("MARKET_DATA_HUB_CAPACITY", "must be greater than 0"));
        }

        let server = ServerSettings {
            health_port: env.parse("PIPELINE_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        Ok(Self {
            credentials: ApiCredentials::new(api_key),
            broker,
            topic,
            publisher,
            supervisor,
            broadcast,
            server,
        })
    }

    /// Topic definition used for provisioning.
    #[must_use]
    pub fn topic_spec(&self) -> TopicSpec {
        TopicSpec::new(self.topic.name.clone(), self.topic.partitions)
            .with_replication_factor(self.topic.replication_factor)
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let publish_retry = RetryConfig {
            initial_delay: self.publisher.retry_initial_delay,
            max_retries: Some(self.publisher.max_retries),
            ..RetryConfig::default()
        };

        OrchestratorConfig {
            topic: self.topic_spec(),
            publisher: PublisherConfig {
                topic: self.topic.name.clone(),
                symbol: self.publisher.symbol.clone(),
                interval: self.publisher.poll_interval,
                retry: publish_retry,
            },
            reader: ReaderConfig {
                topic: self.topic.name.clone(),
                group_id: self.topic.consumer_group.clone(),
                ..ReaderConfig::default()
            },
            supervisor: self.supervisor.policy(),
            shutdown_timeout: self.supervisor.shutdown_timeout,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is present but invalid.
    #[error("environment variable {key} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Typed accessors over a key lookup. Blank values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn value(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.value(key).unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.value(key).map_or(Ok(default), |v| {
            v.parse::<T>()
                .map_err(|e| ConfigError::invalid(key, format!("'{v}': {e}")))
        })
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.value(key).map_or(Ok(default), |v| {
            v.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::invalid(key, format!("'{v}': {e}")))
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.value(key).map_or(Ok(default), |v| {
            v.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::invalid(key, format!("'{v}': {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = load(&[("API_KEY", "secret")]).unwrap();

        assert_eq!(config.credentials.api_key(), "secret");
        assert_eq!(config.broker, BrokerSettings::default());
        assert_eq!(config.topic.name, "market-data");
        assert_eq!(config.topic.partitions, 2);
        assert_eq!(config.topic.consumer_group, "trading-model");
        assert_eq!(config.publisher.symbol, "AAPL");
        assert_eq!(config.publisher.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.publisher.quote_api_url, DEFAULT_QUOTE_API_URL);
        assert_eq!(config.supervisor.mode, SupervisorMode::Restart);
        assert_eq!(config.server.health_port, 8083);
    }

    #[test]
    fn missing_api_key_fails_fast() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::MissingEnvVar("API_KEY".to_string())
        );
    }

    #[test]
    fn empty_api_key_fails_fast() {
        assert_eq!(
            load(&[("API_KEY", "  ")]).unwrap_err(),
            ConfigError::EmptyValue("API_KEY".to_string())
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("API_KEY", "secret"),
            ("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9093"),
            ("BROKER_BACKEND", "MEMORY"),
            ("QUOTE_SYMBOL", "MSFT"),
            ("POLL_INTERVAL_MS", "250"),
            ("PUBLISH_MAX_RETRIES", "4"),
            ("SUPERVISOR_POLICY", "shutdown"),
            ("SHUTDOWN_TIMEOUT_SECS", "5"),
        ])
        .unwrap();

        assert_eq!(
            config.broker.bootstrap_servers,
            vec!["kafka-1:9092".to_string(), "kafka-2:9093".to_string()]
        );
        assert_eq!(config.broker.backend, BrokerBackend::Memory);
        assert_eq!(config.publisher.symbol, "MSFT");
        assert_eq!(config.publisher.poll_interval, Duration::from_millis(250));

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.publisher.retry.max_retries, Some(4));
        assert_eq!(orchestrator.supervisor, SupervisorPolicy::ShutdownAll);
        assert_eq!(orchestrator.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn blank_optional_values_fall_back_to_defaults() {
        let config = load(&[("API_KEY", "secret"), ("QUOTE_SYMBOL", "")]).unwrap();
        assert_eq!(config.publisher.symbol, "AAPL");
    }

    #[test_case("POLL_INTERVAL_MS", "fast" ; "non numeric interval")]
    #[test_case("POLL_INTERVAL_MS", "0" ; "zero interval")]
    #[test_case("MARKET_DATA_PARTITIONS", "0" ; "zero partitions")]
    #[test_case("MARKET_DATA_REPLICATION", "-1" ; "negative replication")]
    #[test_case("KAFKA_BROKERS", "localhost" ; "bootstrap without port")]
    #[test_case("KAFKA_BROKERS", "localhost:0" ; "bootstrap zero port")]
    #[test_case("KAFKA_BROKERS", " , " ; "bootstrap blank entries")]
    #[test_case("BROKER_BACKEND", "rabbit" ; "unknown backend")]
    #[test_case("SUPERVISOR_POLICY", "ignore" ; "unknown supervisor policy")]
    #[test_case("PIPELINE_HEALTH_PORT", "70000" ; "port out of range")]
    #[test_case("MARKET_DATA_HUB_CAPACITY", "0" ; "zero hub capacity")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let err = load(&[("API_KEY", "secret"), (key, value)]).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Invalid { key: k, .. } if k == key),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn topic_spec_matches_settings() {
        let config = load(&[("API_KEY", "secret"), ("MARKET_DATA_REPLICATION", "3")]).unwrap();
        let spec = config.topic_spec();
        assert_eq!(spec.name, "market-data");
        assert_eq!(spec.partitions, 2);
        assert_eq!(spec.replication_factor, 3);
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = ApiCredentials::new("key123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn supervisor_settings_policy() {
        let settings = SupervisorSettings::default();
        assert_eq!(
            settings.policy(),
            SupervisorPolicy::Restart {
                max_restarts: 5,
                delay: Duration::from_secs(1),
            }
        );
    }
}
