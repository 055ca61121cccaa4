#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Data Pipeline - Quote Ingestion over Kafka
//!
//! Polls one symbol's quote from an upstream HTTP API on a fixed cadence,
//! publishes each response verbatim onto a Kafka topic, and reads the topic
//! back through a consumer group, handing decoded events to a sink.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pipeline types with no I/O
//!   - `topic`: Topic definitions and provisioning outcomes
//!   - `market_data`: Raw quotes, broker records, decoded events
//!   - `lifecycle`: Task lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Broker, quote source and sink interfaces
//!   - `services`: Provisioner, publisher, reader, orchestrator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kafka`: rdkafka admin, producer and consumer handles
//!   - `memory`: In-process broker
//!   - `quote_api`: Finnhub HTTP adapter
//!   - `broadcast`: Fan-out and channel sinks
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!              every interval
//! Quote API ◄────────────────── Publisher ──► market-data topic
//!                                                   │
//!                                                   ▼
//!                    Sink ◄── decode ◄── Reader (trading-model group)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pipeline types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::lifecycle::{LifecycleState, TaskRole};
pub use domain::market_data::{
    ConsumedRecord, DeliveryReceipt, MarketDataEvent, OutboundRecord, QuoteView, RawQuote,
};
pub use domain::topic::{TopicProvisioning, TopicSpec, TopicSpecError};

// Ports
pub use application::ports::{
    BrokerConnector, BrokerError, MarketDataSink, MessageConsumer, MessageProducer, QuoteFetchError,
    QuoteSource, SharedBrokerConnector, SinkError, TopicAdmin,
};

// Services
pub use application::services::{
    MarketDataReader, Orchestrator, OrchestratorConfig, OrchestratorError, ProvisionError,
    PublisherConfig, QuotePublisher, ReaderConfig, RetryConfig, SupervisorPolicy, TopicProvisioner,
};

// Infrastructure config
pub use infrastructure::config::{BrokerBackend, ConfigError, PipelineConfig};

// Broker adapters
pub use infrastructure::kafka::KafkaBrokerClient;
pub use infrastructure::memory::InMemoryBroker;

// Quote source
pub use infrastructure::quote_api::{FinnhubConfig, FinnhubQuoteSource};

// Sinks
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastStats, ChannelSink, LoggingSink, MarketDataHub, SharedMarketDataHub,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
