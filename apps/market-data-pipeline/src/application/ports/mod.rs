//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BrokerConnector`: Factory for admin, producer and consumer handles
//! - `QuoteSource`: Upstream quote API
//! - `MarketDataSink`: Downstream consumer of decoded events

mod broker_port;
mod quote_source_port;
mod sink_port;

pub use broker_port::{
    BrokerConnector, BrokerError, MessageConsumer, MessageProducer, SharedBrokerConnector,
    TopicAdmin,
};
pub use quote_source_port::{QuoteFetchError, QuoteSource};
pub use sink_port::{MarketDataSink, SinkError};

#[cfg(test)]
pub use broker_port::MockMessageProducer;
#[cfg(test)]
pub use quote_source_port::MockQuoteSource;
#[cfg(test)]
pub use sink_port::MockMarketDataSink;
