//! Kafka topic administration.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::types::RDKafkaErrorCode;

use crate::application::ports::{BrokerError, TopicAdmin};
use crate::domain::topic::{TopicProvisioning, TopicSpec};

/// Admin handle. The rdkafka client exists only between connect and disconnect.
pub struct KafkaTopicAdmin {
    config: ClientConfig,
    operation_timeout: Duration,
    client: Option<AdminClient<DefaultClientContext>>,
}

impl KafkaTopicAdmin {
    pub(super) const fn new(config: ClientConfig, operation_timeout: Duration) -> Self {
        Self {
            config,
            operation_timeout,
            client: None,
        }
    }
}

#[async_trait]
impl TopicAdmin for KafkaTopicAdmin {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let client = self
            .config
            .create::<AdminClient<DefaultClientContext>>()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        self.client = Some(client);
        tracing::debug!("Kafka admin connected");
        Ok(())
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<TopicProvisioning, BrokerError> {
        let client = self.client.as_ref().ok_or(BrokerError::NotConnected)?;

        let topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.operation_timeout));

        let results = client
            .create_topics([&topic], &options)
            .await
            .map_err(|e| BrokerError::TopicRejected(e.to_string()))?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(TopicProvisioning::Created),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => {
                Ok(TopicProvisioning::AlreadyExists)
            }
            Some(Err((name, code))) => Err(BrokerError::TopicRejected(format!("{name}: {code}"))),
            None => Err(BrokerError::TopicRejected(format!(
                "{}: no result returned",
                spec.name
            ))),
        }
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!("Kafka admin disconnected");
        }
    }
}

impl std::fmt::Debug for KafkaTopicAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTopicAdmin")
            .field("connected", &self.client.is_some())
            .finish_non_exhaustive()
    }
}
