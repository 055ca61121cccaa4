//! In-Memory Broker
//!
//! Process-local `BrokerConnector` with the same observable semantics the
//! pipeline relies on from Kafka: partitioned append-only topics, idempotent
//! topic creation, consumer groups with committed offsets, and per-partition
//! FIFO reads. Used for local runs (`BROKER_BACKEND=memory`) and tests.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::application::ports::{
    BrokerConnector, BrokerError, MessageConsumer, MessageProducer, TopicAdmin,
};
use crate::domain::market_data::{ConsumedRecord, DeliveryReceipt, OutboundRecord};
use crate::domain::topic::{TopicProvisioning, TopicSpec};

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    payload: Vec<u8>,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    next_partition: usize,
}

impl TopicLog {
    fn new(partitions: i32) -> Self {
        let count = usize::try_from(partitions).unwrap_or(1).max(1);
        Self {
            partitions: vec![Vec::new(); count],
            next_partition: 0,
        }
    }

    fn select_partition(&mut self, key: Option<&[u8]>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish() % count as u64).unwrap_or(0)
            }
            None => {
                let partition = self.next_partition % count;
                self.next_partition = self.next_partition.wrapping_add(1);
                partition
            }
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    committed: HashMap<(String, String, usize), usize>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BrokerState>,
    appended: watch::Sender<u64>,
    send_failures: AtomicUsize,
    open_admins: AtomicUsize,
}

// =============================================================================
// Broker
// =============================================================================

/// In-process broker. Cloning shares the same topics and groups.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                appended: watch::channel(0).0,
                send_failures: AtomicUsize::new(0),
                open_admins: AtomicUsize::new(0),
            }),
        }
    }

    /// Partition count of `topic`, if it exists.
    #[must_use]
    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.shared
            .state
            .lock()
            .topics
            .get(topic)
            .map(|log| log.partitions.len())
    }

    /// Every record in `topic`, partition by partition.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let state = self.shared.state.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records
                    .iter()
                    .enumerate()
                    .map(move |(offset, record)| to_consumed(topic, partition, offset, record))
            })
            .collect()
    }

    /// Next offset `group` will read from `partition` of `topic`.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let partition = usize::try_from(partition).ok()?;
        self.shared
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .and_then(|offset| i64::try_from(*offset).ok())
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.send_failures.store(count, Ordering::SeqCst);
    }

    /// Admin handles currently connected.
    #[must_use]
    pub fn open_admin_connections(&self) -> usize {
        self.shared.open_admins.load(Ordering::SeqCst)
    }
}

impl BrokerConnector for InMemoryBroker {
    fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError> {
        Ok(Box::new(MemoryTopicAdmin {
            shared: Arc::clone(&self.shared),
            connected: false,
        }))
    }

    fn producer(&self) -> Result<Arc<dyn MessageProducer>, BrokerError> {
        Ok(Arc::new(MemoryProducer {
            shared: Arc::clone(&self.shared),
            connected: AtomicBool::new(false),
        }))
    }

    fn consumer(&self, group_id: &str) -> Result<Box<dyn MessageConsumer>, BrokerError> {
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            group_id: group_id.to_string(),
            connected: false,
            subscription: None,
        }))
    }
}

fn to_consumed(
    topic: &str,
    partition: usize,
    offset: usize,
    record: &StoredRecord,
) -> ConsumedRecord {
    ConsumedRecord {
        topic: topic.to_string(),
        partition: i32::try_from(partition).unwrap_or(i32::MAX),
        offset: i64::try_from(offset).unwrap_or(i64::MAX),
        payload: Some(record.payload.clone()),
    }
}

// =============================================================================
// Admin
// =============================================================================

struct MemoryTopicAdmin {
    shared: Arc<Shared>,
    connected: bool,
}

#[async_trait]
impl TopicAdmin for MemoryTopicAdmin {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        if !self.connected {
            self.connected = true;
            self.shared.open_admins.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<TopicProvisioning, BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }
        spec.validate()
            .map_err(|e| BrokerError::TopicRejected(e.to_string()))?;

        let mut state = self.shared.state.lock();
        if state.topics.contains_key(&spec.name) {
            return Ok(TopicProvisioning::AlreadyExists);
        }
        state
            .topics
            .insert(spec.name.clone(), TopicLog::new(spec.partitions));
        Ok(TopicProvisioning::Created)
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.shared.open_admins.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Producer
// =============================================================================

struct MemoryProducer {
    shared: Arc<Shared>,
    connected: AtomicBool,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        record: OutboundRecord,
    ) -> Result<DeliveryReceipt, BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::NotConnected);
        }

        let injected = self
            .shared
            .send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BrokerError::Publish("injected send failure".to_string()));
        }

        let receipt = {
            let mut state = self.shared.state.lock();
            let log = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
            let partition = log.select_partition(record.key.as_deref());
            let records = &mut log.partitions[partition];
            records.push(StoredRecord {
                payload: record.payload,
            });
            DeliveryReceipt {
                partition: i32::try_from(partition).unwrap_or(i32::MAX),
                offset: i64::try_from(records.len() - 1).unwrap_or(i64::MAX),
            }
        };

        self.shared.appended.send_modify(|n| *n = n.wrapping_add(1));
        Ok(receipt)
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Consumer
// =============================================================================

struct Subscription {
    topic: String,
    positions: Vec<usize>,
    next_partition: usize,
    appended: watch::Receiver<u64>,
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    group_id: String,
    connected: bool,
    subscription: Option<Subscription>,
}

impl MemoryConsumer {
    /// Take the next unread record, scanning partitions round-robin.
    fn poll(&mut self) -> Result<Option<ConsumedRecord>, BrokerError> {
        let subscription = self.subscription.as_mut().ok_or(BrokerError::NotConnected)?;
        let state = self.shared.state.lock();
        let log = state
            .topics
            .get(&subscription.topic)
            .ok_or_else(|| BrokerError::UnknownTopic(subscription.topic.clone()))?;

        let count = log.partitions.len();
        for step in 0..count {
            let partition = (subscription.next_partition + step) % count;
            let position = subscription.positions[partition];
            if let Some(record) = log.partitions[partition].get(position) {
                subscription.positions[partition] = position + 1;
                subscription.next_partition = (partition + 1) % count;
                return Ok(Some(to_consumed(
                    &subscription.topic,
                    partition,
                    position,
                    record,
                )));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, from_beginning: bool) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::NotConnected);
        }

        let positions = {
            let state = self.shared.state.lock();
            let log = state
                .topics
                .get(topic)
                .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
            log.partitions
                .iter()
                .enumerate()
                .map(|(partition, records)| {
                    let committed = state.committed.get(&(
                        self.group_id.clone(),
                        topic.to_string(),
                        partition,
                    ));
                    match committed {
                        Some(offset) => *offset,
                        None if from_beginning => 0,
                        None => records.len(),
                    }
                })
                .collect()
        };

        self.subscription = Some(Subscription {
            topic: topic.to_string(),
            positions,
            next_partition: 0,
            appended: self.shared.appended.subscribe(),
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<ConsumedRecord, BrokerError> {
        loop {
            if let Some(subscription) = self.subscription.as_mut() {
                subscription.appended.borrow_and_update();
            }
            if let Some(record) = self.poll()? {
                return Ok(record);
            }

            let subscription = self.subscription.as_mut().ok_or(BrokerError::NotConnected)?;
            subscription
                .appended
                .changed()
                .await
                .map_err(|_| BrokerError::Consume("broker shut down".to_string()))?;
        }
    }

    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError> {
        if self.subscription.is_none() {
            return Err(BrokerError::NotConnected);
        }
        let partition = usize::try_from(record.partition)
            .map_err(|_| BrokerError::Commit(format!("invalid partition {}", record.partition)))?;
        let next = usize::try_from(record.offset + 1)
            .map_err(|_| BrokerError::Commit(format!("invalid offset {}", record.offset)))?;

        self.shared
            .state
            .lock()
            .committed
            .insert((self.group_id.clone(), record.topic.clone(), partition), next);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.subscription = None;
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with_topic(partitions: i32) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        let mut admin = broker.admin().unwrap();
        admin.connect().await.unwrap();
        admin
            .create_topic(&TopicSpec::new("market-data", partitions))
            .await
            .unwrap();
        admin.disconnect().await;
        broker
    }

    async fn publish(broker: &InMemoryBroker, payloads: &[&str]) {
        let producer = broker.producer().unwrap();
        producer.connect().await.unwrap();
        for payload in payloads {
            producer
                .send("market-data", OutboundRecord::unkeyed(payload.as_bytes().to_vec()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn topic_creation_is_idempotent() {
        let broker = broker_with_topic(2).await;

        let mut admin = broker.admin().unwrap();
        admin.connect().await.unwrap();
        let outcome = admin
            .create_topic(&TopicSpec::new("market-data", 5))
            .await
            .unwrap();
        admin.disconnect().await;

        assert_eq!(outcome, TopicProvisioning::AlreadyExists);
        assert_eq!(broker.partition_count("market-data"), Some(2));
        assert_eq!(broker.open_admin_connections(), 0);
    }

    #[tokio::test]
    async fn unkeyed_records_spread_round_robin() {
        let broker = broker_with_topic(2).await;
        publish(&broker, &["a", "b", "c"]).await;

        let records = broker.records("market-data");
        let partitions: Vec<_> = records.iter().map(|r| (r.partition, r.offset)).collect();
        assert_eq!(partitions, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[tokio::test]
    async fn send_to_unknown_topic_fails() {
        let broker = InMemoryBroker::new();
        let producer = broker.producer().unwrap();
        producer.connect().await.unwrap();

        let err = producer
            .send("missing", OutboundRecord::unkeyed(Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::UnknownTopic("missing".to_string()));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let broker = broker_with_topic(1).await;
        let producer = broker.producer().unwrap();
        producer.connect().await.unwrap();
        broker.fail_next_sends(1);

        let record = OutboundRecord::unkeyed(b"{}".to_vec());
        assert!(producer.send("market-data", record.clone()).await.is_err());
        assert!(producer.send("market-data", record).await.is_ok());
    }

    #[tokio::test]
    async fn consumer_reads_from_beginning_and_resumes_from_commit() {
        let broker = broker_with_topic(1).await;
        publish(&broker, &["1", "2", "3"]).await;

        let mut consumer = broker.consumer("trading-model").unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("market-data", true).await.unwrap();
        let first = consumer.recv().await.unwrap();
        consumer.commit(&first).await.unwrap();
        let second = consumer.recv().await.unwrap();
        assert_eq!(second.offset, 1);
        consumer.disconnect().await.unwrap();

        // Second was never committed, so it is read again.
        let mut consumer = broker.consumer("trading-model").unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("market-data", true).await.unwrap();
        assert_eq!(consumer.recv().await.unwrap().offset, 1);
        assert_eq!(broker.committed_offset("trading-model", "market-data", 0), Some(1));
    }

    #[tokio::test]
    async fn new_group_without_from_beginning_starts_at_end() {
        let broker = broker_with_topic(1).await;
        publish(&broker, &["old"]).await;

        let mut consumer = broker.consumer("late-joiner").unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("market-data", false).await.unwrap();

        publish(&broker, &["new"]).await;
        let record = consumer.recv().await.unwrap();
        assert_eq!(record.payload.as_deref(), Some(b"new".as_slice()));
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let broker = broker_with_topic(2).await;
        let mut consumer = broker.consumer("trading-model").unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("market-data", true).await.unwrap();

        let reader = tokio::spawn(async move { consumer.recv().await });
        tokio::task::yield_now().await;
        publish(&broker, &["late"]).await;

        let record = reader.await.unwrap().unwrap();
        assert_eq!(record.payload.as_deref(), Some(b"late".as_slice()));
    }
}
