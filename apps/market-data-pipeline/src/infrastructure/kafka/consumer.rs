//! Kafka consumer-group handle.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};

use crate::application::ports::{BrokerError, MessageConsumer};
use crate::domain::market_data::ConsumedRecord;

/// Consumer handle with manual commits.
///
/// The rdkafka consumer is built at subscribe time because the start
/// position (`auto.offset.reset`) is part of its configuration.
pub struct KafkaMessageConsumer {
    config: ClientConfig,
    connected: bool,
    consumer: Option<StreamConsumer>,
}

impl KafkaMessageConsumer {
    pub(super) const fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connected: false,
            consumer: None,
        }
    }

    fn active(&self) -> Result<&StreamConsumer, BrokerError> {
        self.consumer.as_ref().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl MessageConsumer for KafkaMessageConsumer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        if self.config.get("group.id").is_none() {
            return Err(BrokerError::Connection("consumer has no group id".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }

        let mut config = self.config.clone();
        config.set(
            "auto.offset.reset",
            if from_beginning { "earliest" } else { "latest" },
        );
        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        tracing::debug!(topic, from_beginning, "Kafka consumer subscribed");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn recv(&mut self) -> Result<ConsumedRecord, BrokerError> {
        let message = self
            .active()?
            .recv()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        Ok(ConsumedRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
        })
    }

    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        let consumer = self.active()?;

        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset + 1),
            )
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            tracing::debug!("Kafka consumer left group");
        }
        self.connected = false;
        Ok(())
    }
}

impl std::fmt::Debug for KafkaMessageConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageConsumer")
            .field("connected", &self.connected)
            .field("subscribed", &self.consumer.is_some())
            .finish_non_exhaustive()
    }
}
