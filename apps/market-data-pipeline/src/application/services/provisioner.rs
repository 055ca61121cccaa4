//! Topic Provisioner
//!
//! One-shot startup gate that makes sure the market data topic exists before
//! anything publishes to or reads from it.

use crate::application::ports::{BrokerError, SharedBrokerConnector};
use crate::domain::topic::{TopicProvisioning, TopicSpec, TopicSpecError};
use crate::infrastructure::metrics;

/// Provisioning errors. All of them are fatal to startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    /// The requested topic shape is invalid.
    #[error("invalid topic spec: {0}")]
    InvalidSpec(#[from] TopicSpecError),

    /// The admin connection could not be opened.
    #[error("admin connection failed: {0}")]
    Connect(BrokerError),

    /// The broker refused to create the topic.
    #[error("topic '{topic}' could not be created: {source}")]
    Rejected {
        /// Topic name.
        topic: String,
        /// Underlying broker error.
        source: BrokerError,
    },

    /// The connector could not build an admin handle.
    #[error("admin handle unavailable: {0}")]
    Handle(BrokerError),
}

/// Ensures topics exist.
pub struct TopicProvisioner {
    connector: SharedBrokerConnector,
}

impl TopicProvisioner {
    /// Create a provisioner over a broker connector.
    #[must_use]
    pub fn new(connector: SharedBrokerConnector) -> Self {
        Self { connector }
    }

    /// Create `spec` if it does not exist yet.
    ///
    /// An existing topic is success. The admin connection is closed before
    /// returning on every path. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `ProvisionError` if the spec is invalid, the admin connection
    /// fails, or the broker rejects the request for any reason other than
    /// the topic already existing.
    pub async fn ensure_topic(
        &self,
        spec: &TopicSpec,
    ) -> Result<TopicProvisioning, ProvisionError> {
        spec.validate()?;

        let mut admin = self.connector.admin().map_err(ProvisionError::Handle)?;

        if let Err(e) = admin.connect().await {
            admin.disconnect().await;
            return Err(ProvisionError::Connect(e));
        }

        let result = admin.create_topic(spec).await;
        admin.disconnect().await;

        match result {
            Ok(outcome) => {
                metrics::record_topic_provisioned(outcome);
                tracing::info!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    outcome = outcome.as_str(),
                    "Topic provisioned"
                );
                Ok(outcome)
            }
            Err(source) => {
                tracing::error!(topic = %spec.name, error = %source, "Topic provisioning failed");
                Err(ProvisionError::Rejected {
                    topic: spec.name.clone(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for TopicProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicProvisioner").finish_non_exhaustive()
    }
}
