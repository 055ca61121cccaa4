//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TopicProvisioner`: Ensures the market data topic exists at startup
//! - `QuotePublisher`: Polls the quote API and publishes on a fixed timer
//! - `MarketDataReader`: Consumes the topic and feeds a `MarketDataSink`
//! - `Orchestrator`: Sequences provisioning and supervises both tasks

pub mod orchestrator;
pub mod provisioner;
pub mod publisher;
pub mod reader;
pub mod retry;
pub mod status;

pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, SupervisorPolicy};
pub use provisioner::{ProvisionError, TopicProvisioner};
pub use publisher::{CycleOutcome, PublisherConfig, PublisherError, QuotePublisher};
pub use reader::{MarketDataReader, ReaderConfig, ReaderError};
pub use retry::{RetryConfig, RetryPolicy};
pub use status::{PublisherSnapshot, PublisherStatus, ReaderSnapshot, ReaderStatus, TaskStatus};
