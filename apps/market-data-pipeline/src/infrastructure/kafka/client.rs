//! Kafka broker client factory.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::ClientConfig;

use super::{KafkaMessageConsumer, KafkaMessageProducer, KafkaTopicAdmin, parse_bootstrap_servers};
use crate::application::ports::{
    BrokerConnector, BrokerError, MessageConsumer, MessageProducer, TopicAdmin,
};

/// Default time the broker has to acknowledge a publish.
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for admin operations and producer flushes.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared, stateless Kafka connection factory.
#[derive(Debug, Clone)]
pub struct KafkaBrokerClient {
    bootstrap_servers: String,
    client_id: String,
    delivery_timeout: Duration,
    operation_timeout: Duration,
}

impl KafkaBrokerClient {
    /// Create a client for `servers`. Performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidBootstrap` if the server list is empty
    /// or malformed.
    pub fn new(servers: &[String], client_id: impl Into<String>) -> Result<Self, BrokerError> {
        let bootstrap_servers = parse_bootstrap_servers(&servers.join(","))?.join(",");
        Ok(Self {
            bootstrap_servers,
            client_id: client_id.into(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Override the publish acknowledgement timeout.
    #[must_use]
    pub const fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Normalised bootstrap list.
    #[must_use]
    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id);
        config
    }
}

impl BrokerConnector for KafkaBrokerClient {
    fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError> {
        Ok(Box::new(KafkaTopicAdmin::new(
            self.base_config(),
            self.operation_timeout,
        )))
    }

    fn producer(&self) -> Result<Arc<dyn MessageProducer>, BrokerError> {
        let mut config = self.base_config();
        config.set("message.timeout.ms", self.delivery_timeout.as_millis().to_string());
        Ok(Arc::new(KafkaMessageProducer::new(
            config,
            self.delivery_timeout,
            self.operation_timeout,
        )))
    }

    fn consumer(&self, group_id: &str) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        if group_id.trim().is_empty() {
            return Err(BrokerError::Consume("consumer group id cannot be empty".to_string()));
        }
        let mut config = self.base_config();
        config
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false");
        Ok(Box::new(KafkaMessageConsumer::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_validates_bootstrap() {
        let err = KafkaBrokerClient::new(&["localhost".to_string()], "test").unwrap_err();
        assert!(matches!(err, BrokerError::InvalidBootstrap(_)));

        let err = KafkaBrokerClient::new(&[], "test").unwrap_err();
        assert!(matches!(err, BrokerError::InvalidBootstrap(_)));
    }

    #[test]
    fn construction_joins_servers() {
        let client = KafkaBrokerClient::new(
            &["kafka-1:9092".to_string(), " kafka-2:9092".to_string()],
            "market-data-pipeline",
        )
        .unwrap();
        assert_eq!(client.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
    }

    #[test]
    fn handles_are_created_without_network() {
        let client = KafkaBrokerClient::new(&["localhost:9092".to_string()], "test").unwrap();
        assert!(client.admin().is_ok());
        assert!(client.producer().is_ok());
        assert!(client.consumer("trading-model").is_ok());
        assert!(client.consumer(" ").is_err());
    }

    #[tokio::test]
    async fn handles_refuse_work_before_connect() {
        let client = KafkaBrokerClient::new(&["localhost:9092".to_string()], "test").unwrap();

        let mut admin = client.admin().unwrap();
        assert_eq!(
            admin
                .create_topic(&crate::domain::topic::TopicSpec::default())
                .await
                .unwrap_err(),
            BrokerError::NotConnected
        );

        let producer = client.producer().unwrap();
        let record = crate::domain::market_data::OutboundRecord::unkeyed(b"{}".to_vec());
        assert_eq!(
            producer.send("market-data", record).await.unwrap_err(),
            BrokerError::NotConnected
        );

        let mut consumer = client.consumer("trading-model").unwrap();
        assert_eq!(consumer.recv().await.unwrap_err(), BrokerError::NotConnected);
        assert!(consumer.disconnect().await.is_ok());
    }
}
