//! Market Data Sink Port (Driven Port)
//!
//! Injection point for whatever consumes decoded market data events, such as
//! a model-serving component.

use async_trait::async_trait;

use crate::domain::market_data::MarketDataEvent;

/// Sink delivery error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The downstream side has gone away.
    #[error("market data sink is closed")]
    Closed,

    /// The downstream side refused the event.
    #[error("market data sink rejected event: {message}")]
    Rejected {
        /// Error details.
        message: String,
    },
}

/// Port receiving one decoded event per delivered record.
///
/// Delivery is at-least-once with partition-local ordering only, so
/// implementations should tolerate duplicates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSink: Send + Sync {
    /// Hand an event downstream.
    async fn deliver(&self, event: MarketDataEvent) -> Result<(), SinkError>;
}
