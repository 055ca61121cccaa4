//! Kafka producer handle.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::application::ports::{BrokerError, MessageProducer};
use crate::domain::market_data::{DeliveryReceipt, OutboundRecord};

/// Producer handle shared by concurrent poll cycles.
pub struct KafkaMessageProducer {
    config: ClientConfig,
    delivery_timeout: Duration,
    flush_timeout: Duration,
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaMessageProducer {
    pub(super) fn new(
        config: ClientConfig,
        delivery_timeout: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            config,
            delivery_timeout,
            flush_timeout,
            producer: RwLock::new(None),
        }
    }
}

#[async_trait]
impl MessageProducer for KafkaMessageProducer {
    async fn connect(&self) -> Result<(), BrokerError> {
        let producer: FutureProducer = self
            .config
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        *self.producer.write() = Some(producer);
        tracing::debug!("Kafka producer connected");
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        record: OutboundRecord,
    ) -> Result<DeliveryReceipt, BrokerError> {
        let producer = self
            .producer
            .read()
            .clone()
            .ok_or(BrokerError::NotConnected)?;

        let mut kafka_record =
            FutureRecord::<[u8], [u8]>::to(topic).payload(record.payload.as_slice());
        if let Some(key) = record.key.as_deref() {
            kafka_record = kafka_record.key(key);
        }

        producer
            .send(kafka_record, Timeout::After(self.delivery_timeout))
            .await
            .map(|(partition, offset)| DeliveryReceipt { partition, offset })
            .map_err(|(e, _)| BrokerError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let producer = self.producer.write().take();
        let Some(producer) = producer else {
            return Ok(());
        };

        let timeout = self.flush_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Publish(format!("flush task failed: {e}")))?
            .map_err(|e| BrokerError::Publish(format!("flush failed: {e}")))?;

        tracing::debug!("Kafka producer flushed and disconnected");
        Ok(())
    }
}

impl std::fmt::Debug for KafkaMessageProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageProducer")
            .field("connected", &self.producer.read().is_some())
            .field("delivery_timeout", &self.delivery_timeout)
            .finish_non_exhaustive()
    }
}
