//! Broadcast Channel Adapters
//!
//! Implements market data distribution using a tokio broadcast channel for
//! fan-out to multiple downstream subscribers, plus two simpler sinks.
//!
//! # Sinks
//!
//! - `MarketDataHub`: Broadcast fan-out of every decoded event
//! - `LoggingSink`: Logs a typed view of each quote
//! - `ChannelSink`: Forwards events to a bounded mpsc channel
//!
//! All three implement `MarketDataSink` and can be handed to the reader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::application::ports::{MarketDataSink, SinkError};
use crate::domain::market_data::MarketDataEvent;
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Capacity of the market data channel. Slow receivers that fall further
    /// behind than this observe a lag and skip ahead.
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            capacity: settings.capacity,
        }
    }
}

/// Fan-out hub for decoded market data.
///
/// # Example
///
/// ```rust
/// use market_data_pipeline::infrastructure::broadcast::{BroadcastConfig, MarketDataHub};
///
/// let hub = MarketDataHub::new(BroadcastConfig::default());
///
/// // Get a receiver for market data
/// let mut rx = hub.subscribe();
///
/// // The reader delivers events through the `MarketDataSink` impl
/// assert_eq!(hub.receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct MarketDataHub {
    tx: broadcast::Sender<MarketDataEvent>,
    sent: AtomicU64,
    unobserved: AtomicU64,
}

impl MarketDataHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            tx: broadcast::channel(config.capacity.max(1)).0,
            sent: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that got the event, or `None` if there
    /// are no active receivers.
    #[must_use]
    pub fn send(&self, event: MarketDataEvent) -> Option<usize> {
        if let Ok(receivers) = self.tx.send(event) {
            self.sent.fetch_add(1, Ordering::Relaxed);
            metrics::record_events_broadcast(receivers as u64);
            Some(receivers)
        } else {
            self.unobserved.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Get a new receiver for market data.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MarketDataEvent> {
        self.tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get statistics about the hub.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            receivers: self.receiver_count(),
            events_sent: self.sent.load(Ordering::Relaxed),
            events_unobserved: self.unobserved.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MarketDataSink for MarketDataHub {
    async fn deliver(&self, event: MarketDataEvent) -> Result<(), SinkError> {
        // No receivers is not a failure; the record is still handled.
        let _ = self.send(event);
        Ok(())
    }
}

/// Shared hub reference.
pub type SharedMarketDataHub = Arc<MarketDataHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStats {
    /// Number of active receivers.
    pub receivers: usize,
    /// Events delivered to at least one receiver.
    pub events_sent: u64,
    /// Events sent while nobody was subscribed.
    pub events_unobserved: u64,
}

// =============================================================================
// Logging Sink
// =============================================================================

/// Sink that logs each event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl MarketDataSink for LoggingSink {
    async fn deliver(&self, event: MarketDataEvent) -> Result<(), SinkError> {
        let view = event.quote_view();
        if view.has_price() {
            tracing::info!(
                partition = event.partition,
                offset = event.offset,
                symbol = view.symbol.as_deref().unwrap_or("-"),
                price = ?view.price,
                change = ?view.change,
                change_percent = ?view.change_percent,
                "Market data received"
            );
        } else {
            tracing::info!(
                partition = event.partition,
                offset = event.offset,
                payload = %event.payload,
                "Market data received"
            );
        }
        Ok(())
    }
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Sink forwarding events to a bounded mpsc channel.
///
/// Applies backpressure: delivery waits for channel capacity. A dropped
/// receiver turns every delivery into `SinkError::Closed`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MarketDataEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MarketDataEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MarketDataSink for ChannelSink {
    async fn deliver(&self, event: MarketDataEvent) -> Result<(), SinkError> {
        self.tx.send(event).await.map_err(|_| SinkError::Closed)
    }
}

// =============================================================================
// Tests
// =============================================================================
