//! Quote Publisher
//!
//! Timer-driven loop that fetches one symbol's quote and publishes the body
//! verbatim to the market data topic.
//!
//! Each tick runs as its own task so a slow or panicking cycle never stalls
//! the timer. Missed ticks are skipped rather than bursted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::retry::{RetryConfig, RetryPolicy};
use super::status::PublisherStatus;
use crate::application::ports::{BrokerError, MessageProducer, QuoteFetchError, QuoteSource};
use crate::domain::lifecycle::LifecycleState;
use crate::domain::market_data::{DeliveryReceipt, OutboundRecord};
use crate::domain::topic::MARKET_DATA_TOPIC;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Publisher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Destination topic.
    pub topic: String,
    /// Ticker to poll.
    pub symbol: String,
    /// Time between ticks.
    pub interval: Duration,
    /// Backoff for failed sends within a cycle.
    pub retry: RetryConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: MARKET_DATA_TOPIC.to_string(),
            symbol: "AAPL".to_string(),
            interval: Duration::from_millis(1000),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that end the publisher task.
///
/// Per-cycle failures never surface here; they are logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublisherError {
    /// The poll interval is zero.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,

    /// The producer could not be created.
    #[error("producer unavailable: {0}")]
    Handle(BrokerError),

    /// The producer connection could not be opened.
    #[error("producer connection failed: {0}")]
    Connect(BrokerError),
}

// =============================================================================
// Poll Cycle
// =============================================================================

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The quote was fetched and acknowledged by the broker.
    Published(DeliveryReceipt),
    /// The fetch failed; nothing was published.
    FetchFailed(QuoteFetchError),
    /// Every publish attempt failed; the quote was dropped.
    PublishFailed(BrokerError),
}

/// One fetch-then-publish unit of work.
#[derive(Clone)]
struct PollCycle {
    producer: Arc<dyn MessageProducer>,
    source: Arc<dyn QuoteSource>,
    topic: Arc<str>,
    symbol: Arc<str>,
    retry: RetryConfig,
    status: Arc<PublisherStatus>,
}

impl PollCycle {
    async fn execute(self) -> CycleOutcome {
        let started = Instant::now();

        let quote = match self.source.fetch_quote(&self.symbol).await {
            Ok(quote) => quote,
            Err(e) => {
                metrics::record_fetch_failure(e.kind());
                self.status.record_fetch_failure(e.to_string());
                tracing::warn!(error = %e, "Quote fetch failed, skipping cycle");
                return CycleOutcome::FetchFailed(e);
            }
        };
        metrics::record_fetch_duration(started.elapsed());

        match self.publish(quote.into_record()).await {
            Ok(receipt) => {
                metrics::record_quote_published(receipt.partition);
                metrics::record_cycle_duration(started.elapsed());
                self.status.record_published();
                tracing::info!(
                    topic = %self.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Quote published"
                );
                CycleOutcome::Published(receipt)
            }
            Err(e) => {
                metrics::record_publish_failure();
                self.status.record_publish_failure(e.to_string());
                tracing::error!(topic = %self.topic, error = %e, "Publish failed, dropping quote");
                CycleOutcome::PublishFailed(e)
            }
        }
    }

    async fn publish(&self, record: OutboundRecord) -> Result<DeliveryReceipt, BrokerError> {
        let mut policy = RetryPolicy::new(self.retry.clone());
        loop {
            match self.producer.send(&self.topic, record.clone()).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    let Some(delay) = policy.next_delay() else {
                        return Err(e);
                    };
                    metrics::record_publish_retry();
                    tracing::warn!(
                        error = %e,
                        retry = policy.retry_count(),
                        delay_ms = delay.as_millis(),
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Periodic quote publisher.
pub struct QuotePublisher {
    cycle: PollCycle,
    interval: Duration,
}

impl QuotePublisher {
    /// Create a publisher over a producer handle and a quote source.
    #[must_use]
    pub fn new(
        producer: Arc<dyn MessageProducer>,
        source: Arc<dyn QuoteSource>,
        config: PublisherConfig,
        status: Arc<PublisherStatus>,
    ) -> Self {
        Self {
            cycle: PollCycle {
                producer,
                source,
                topic: Arc::from(config.topic),
                symbol: Arc::from(config.symbol),
                retry: config.retry,
                status,
            },
            interval: config.interval,
        }
    }

    /// Run one fetch-then-publish cycle immediately, outside the timer.
    ///
    /// The producer must already be connected.
    pub async fn poll_once(&self) -> CycleOutcome {
        self.cycle.clone().execute().await
    }

    /// Connect and publish on every tick until `cancel` fires.
    ///
    /// The first tick fires one interval after start. On cancellation
    /// in-flight cycles complete, then the producer is flushed and closed.
    ///
    /// # Errors
    ///
    /// Returns `PublisherError` if the interval is zero or the producer
    /// cannot connect.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), PublisherError> {
        let status = Arc::clone(&self.cycle.status);

        if self.interval.is_zero() {
            status.task().set_error(PublisherError::InvalidInterval.to_string());
            status.task().set_state(LifecycleState::Stopped);
            return Err(PublisherError::InvalidInterval);
        }

        if let Err(e) = self.cycle.producer.connect().await {
            status.task().set_error(e.to_string());
            status.task().set_state(LifecycleState::Stopped);
            return Err(PublisherError::Connect(e));
        }

        status.task().set_state(LifecycleState::Running);
        tracing::info!(
            topic = %self.cycle.topic,
            symbol = %self.cycle.symbol,
            interval_ms = self.interval.as_millis(),
            "Quote publisher started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles: JoinSet<CycleOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    reap(&status, joined);
                }
                _ = ticker.tick() => {
                    status.record_tick();
                    metrics::record_poll_tick();
                    let span = tracing::info_span!(
                        "poll_cycle",
                        cycle_id = %Uuid::new_v4(),
                        symbol = %self.cycle.symbol
                    );
                    cycles.spawn(self.cycle.clone().execute().instrument(span));
                }
            }
        }

        status.task().set_state(LifecycleState::Draining);
        tracing::info!(in_flight = cycles.len(), "Quote publisher draining");
        while let Some(joined) = cycles.join_next().await {
            reap(&status, joined);
        }

        if let Err(e) = self.cycle.producer.disconnect().await {
            status.task().set_error(e.to_string());
            tracing::warn!(error = %e, "Producer disconnect failed");
        }
        status.task().set_state(LifecycleState::Stopped);
        tracing::info!(published = status.published(), "Quote publisher stopped");
        Ok(())
    }
}

impl std::fmt::Debug for QuotePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotePublisher")
            .field("topic", &self.cycle.topic)
            .field("symbol", &self.cycle.symbol)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

fn reap(status: &PublisherStatus, joined: Result<CycleOutcome, JoinError>) {
    match joined {
        Ok(_) => {}
        Err(e) if e.is_panic() => {
            metrics::record_cycle_panic();
            status.record_panicked_cycle(format!("poll cycle panicked: {e}"));
            tracing::error!(error = %e, "Poll cycle panicked");
        }
        Err(e) => tracing::debug!(error = %e, "Poll cycle cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{MockMessageProducer, MockQuoteSource};
    use crate::domain::market_data::RawQuote;

    const BODY: &str = r#"{"c":150.2,"d":1.1,"dp":0.74,"t":1700000000}"#;

    fn config(retries: u32) -> PublisherConfig {
        PublisherConfig {
            retry: RetryConfig::immediate(Some(retries)),
            ..PublisherConfig::default()
        }
    }

    fn quoting_source() -> MockQuoteSource {
        let mut source = MockQuoteSource::new();
        source
            .expect_fetch_quote()
            .returning(|symbol| Ok(RawQuote::new(symbol, BODY)));
        source
    }

    fn publisher(
        producer: MockMessageProducer,
        source: impl QuoteSource + 'static,
        config: PublisherConfig,
    ) -> (QuotePublisher, Arc<PublisherStatus>) {
        let status = Arc::new(PublisherStatus::new());
        let publisher = QuotePublisher::new(
            Arc::new(producer),
            Arc::new(source),
            config,
            Arc::clone(&status),
        );
        (publisher, status)
    }

    #[tokio::test]
    async fn publishes_body_verbatim_without_key() {
        let mut producer = MockMessageProducer::new();
        producer
            .expect_send()
            .withf(|topic, record| {
                topic == "market-data" && record.key.is_none() && record.payload == BODY.as_bytes()
            })
            .times(1)
            .returning(|_, _| Ok(DeliveryReceipt { partition: 1, offset: 7 }));

        let (publisher, status) = publisher(producer, quoting_source(), config(2));

        let outcome = publisher.poll_once().await;

        assert_eq!(
            outcome,
            CycleOutcome::Published(DeliveryReceipt { partition: 1, offset: 7 })
        );
        assert_eq!(status.published(), 1);
    }

    #[tokio::test]
    async fn fetch_error_skips_publish() {
        let mut source = MockQuoteSource::new();
        source
            .expect_fetch_quote()
            .returning(|_| Err(QuoteFetchError::RateLimited));
        let mut producer = MockMessageProducer::new();
        producer.expect_send().never();

        let (publisher, status) = publisher(producer, source, config(2));

        let outcome = publisher.poll_once().await;

        assert_eq!(outcome, CycleOutcome::FetchFailed(QuoteFetchError::RateLimited));
        assert_eq!(status.snapshot().fetch_failures, 1);
    }

    #[tokio::test]
    async fn publish_retries_are_bounded() {
        let mut producer = MockMessageProducer::new();
        producer
            .expect_send()
            .times(3)
            .returning(|_, _| Err(BrokerError::Publish("leader not available".to_string())));

        let (publisher, status) = publisher(producer, quoting_source(), config(2));

        let outcome = publisher.poll_once().await;

        assert!(matches!(outcome, CycleOutcome::PublishFailed(BrokerError::Publish(_))));
        assert_eq!(status.snapshot().publish_failures, 1);
        assert_eq!(status.published(), 0);
    }

    #[tokio::test]
    async fn publish_succeeds_after_a_retry() {
        let mut producer = MockMessageProducer::new();
        let mut seq = mockall::Sequence::new();
        producer
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(BrokerError::Publish("timed out".to_string())));
        producer
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(DeliveryReceipt { partition: 0, offset: 0 }));

        let (publisher, status) = publisher(producer, quoting_source(), config(2));

        assert!(matches!(publisher.poll_once().await, CycleOutcome::Published(_)));
        assert_eq!(status.snapshot().publish_failures, 0);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let (publisher, status) = publisher(
            MockMessageProducer::new(),
            quoting_source(),
            PublisherConfig {
                interval: Duration::ZERO,
                ..config(0)
            },
        );

        let err = publisher.run(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, PublisherError::InvalidInterval);
        assert_eq!(status.task().state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn connect_failure_ends_task() {
        let mut producer = MockMessageProducer::new();
        producer
            .expect_connect()
            .returning(|| Err(BrokerError::Connection("no brokers".to_string())));

        let (publisher, status) = publisher(producer, quoting_source(), config(0));

        let err = publisher.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, PublisherError::Connect(_)));
        assert_eq!(status.task().state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_and_drains_on_cancel() {
        let mut producer = MockMessageProducer::new();
        producer.expect_connect().times(1).returning(|| Ok(()));
        producer
            .expect_send()
            .returning(|_, _| Ok(DeliveryReceipt { partition: 0, offset: 0 }));
        producer.expect_disconnect().times(1).returning(|| Ok(()));

        let (publisher, status) = publisher(producer, quoting_source(), config(0));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publisher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.ticks, 3);
        assert_eq!(snapshot.published, 3);
        assert_eq!(snapshot.state, LifecycleState::Stopped);
    }

    struct PanickingSource;

    #[async_trait]
    impl QuoteSource for PanickingSource {
        async fn fetch_quote(&self, _symbol: &str) -> Result<RawQuote, QuoteFetchError> {
            panic!("upstream client bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_cycle_does_not_stop_timer() {
        let mut producer = MockMessageProducer::new();
        producer.expect_connect().returning(|| Ok(()));
        producer.expect_send().never();
        producer.expect_disconnect().returning(|| Ok(()));

        let (publisher, status) = publisher(producer, PanickingSource, config(0));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(publisher.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let snapshot = status.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.panicked_cycles, 2);
    }
}
