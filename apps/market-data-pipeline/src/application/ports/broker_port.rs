//! Broker Ports (Driven)
//!
//! Role-specific handles onto the messaging cluster. A `BrokerConnector` is a
//! stateless factory; each handle it returns owns its own connection, which is
//! only opened by an explicit `connect` and released by `disconnect`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::market_data::{ConsumedRecord, DeliveryReceipt, OutboundRecord};
use crate::domain::topic::{TopicProvisioning, TopicSpec};

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Bootstrap address list is malformed.
    #[error("invalid bootstrap configuration: {0}")]
    InvalidBootstrap(String),

    /// Connection could not be established.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Handle was used before `connect` (or after `disconnect`).
    #[error("broker handle is not connected")]
    NotConnected,

    /// Topic creation was rejected for a reason other than "already exists".
    #[error("topic request rejected: {0}")]
    TopicRejected(String),

    /// Topic does not exist.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Publishing a record failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Receiving a record failed.
    #[error("consume failed: {0}")]
    Consume(String),

    /// Committing an offset failed.
    #[error("offset commit failed: {0}")]
    Commit(String),
}

/// Administrative handle used for topic provisioning.
#[async_trait]
pub trait TopicAdmin: Send {
    /// Open the admin connection.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Request creation of a topic.
    ///
    /// An existing topic is reported as `TopicProvisioning::AlreadyExists`,
    /// not as an error.
    async fn create_topic(&mut self, spec: &TopicSpec) -> Result<TopicProvisioning, BrokerError>;

    /// Close the admin connection. Safe to call when not connected.
    async fn disconnect(&mut self);
}

/// Publishing handle.
///
/// Shared between poll cycles, so every method takes `&self`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Open the producer connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Publish a single record and wait for the broker acknowledgement.
    async fn send(&self, topic: &str, record: OutboundRecord)
    -> Result<DeliveryReceipt, BrokerError>;

    /// Flush in-flight records and close the connection.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Consumer-group handle.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Open the consumer connection.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Join the group and subscribe to a topic.
    ///
    /// With `from_beginning`, a group with no committed offset starts at the
    /// earliest retained record instead of the log end.
    async fn subscribe(&mut self, topic: &str, from_beginning: bool) -> Result<(), BrokerError>;

    /// Wait for the next record. Cancel-safe.
    async fn recv(&mut self) -> Result<ConsumedRecord, BrokerError>;

    /// Commit the group position past `record`.
    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), BrokerError>;

    /// Leave the group and close the connection. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}

/// Factory for role-specific broker handles.
///
/// Construction validates configuration only; no handle touches the network
/// until it is connected.
pub trait BrokerConnector: Send + Sync {
    /// Create an admin handle.
    fn admin(&self) -> Result<Box<dyn TopicAdmin>, BrokerError>;

    /// Create a producer handle.
    fn producer(&self) -> Result<Arc<dyn MessageProducer>, BrokerError>;

    /// Create a consumer handle bound to `group_id`.
    fn consumer(&self, group_id: &str) -> Result<Box<dyn MessageConsumer>, BrokerError>;
}

/// Shared broker connector reference.
pub type SharedBrokerConnector = Arc<dyn BrokerConnector>;
