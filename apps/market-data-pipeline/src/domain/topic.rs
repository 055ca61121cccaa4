//! Topic Types
//!
//! The partitioned append log that carries market data between the
//! publisher and the reader.

/// Default topic for market data quotes.
pub const MARKET_DATA_TOPIC: &str = "market-data";

/// Default partition count for the market data topic.
pub const MARKET_DATA_PARTITIONS: i32 = 2;

/// Default consumer group for the trading model reader.
pub const TRADING_MODEL_GROUP: &str = "trading-model";

/// Topic definition used by provisioning, publishing and subscribing.
///
/// The partition count is fixed at creation time. Provisioning an existing
/// topic with the same spec is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions.
    pub partitions: i32,
    /// Replication factor requested at creation.
    pub replication_factor: i32,
}

impl TopicSpec {
    /// Create a topic spec with replication factor 1.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: i32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor: 1,
        }
    }

    /// Set the replication factor.
    #[must_use]
    pub const fn with_replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    /// Check the spec before it is sent to a broker.
    ///
    /// # Errors
    ///
    /// Returns `TopicSpecError` if the name is blank or a count is below 1.
    pub fn validate(&self) -> Result<(), TopicSpecError> {
        if self.name.trim().is_empty() {
            return Err(TopicSpecError::EmptyName);
        }
        if self.partitions < 1 {
            return Err(TopicSpecError::InvalidPartitions(self.partitions));
        }
        if self.replication_factor < 1 {
            return Err(TopicSpecError::InvalidReplication(self.replication_factor));
        }
        Ok(())
    }
}

impl Default for TopicSpec {
    fn default() -> Self {
        Self::new(MARKET_DATA_TOPIC, MARKET_DATA_PARTITIONS)
    }
}

/// Outcome of a topic provisioning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicProvisioning {
    /// The topic did not exist and was created.
    Created,
    /// The topic already existed; nothing changed.
    AlreadyExists,
}

impl TopicProvisioning {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyExists => "already_exists",
        }
    }
}

/// Invalid topic definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicSpecError {
    /// Topic name is blank.
    #[error("topic name cannot be empty")]
    EmptyName,
    /// Partition count below 1.
    #[error("partition count must be at least 1, got {0}")]
    InvalidPartitions(i32),
    /// Replication factor below 1.
    #[error("replication factor must be at least 1, got {0}")]
    InvalidReplication(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_market_data() {
        let spec = TopicSpec::default();
        assert_eq!(spec.name, "market-data");
        assert_eq!(spec.partitions, 2);
        assert_eq!(spec.replication_factor, 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn blank_name_rejected() {
        let spec = TopicSpec::new("  ", 2);
        assert_eq!(spec.validate(), Err(TopicSpecError::EmptyName));
    }

    #[test]
    fn zero_partitions_rejected() {
        let spec = TopicSpec::new("market-data", 0);
        assert_eq!(spec.validate(), Err(TopicSpecError::InvalidPartitions(0)));
    }

    #[test]
    fn zero_replication_rejected() {
        let spec = TopicSpec::new("market-data", 2).with_replication_factor(0);
        assert_eq!(spec.validate(), Err(TopicSpecError::InvalidReplication(0)));
    }
}
