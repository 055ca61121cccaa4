//! Market Data Reader
//!
//! Consumer-group loop that decodes each market data record and hands it to a
//! `MarketDataSink`. Offsets are committed only after the record has been
//! handled, so delivery is at-least-once with per-partition ordering.
//!
//! A record the sink keeps refusing stops the reader before anything later
//! in its partition is committed. The next session of the group resumes at
//! that record.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::retry::{RetryConfig, RetryPolicy};
use super::status::ReaderStatus;
use crate::application::ports::{BrokerError, MarketDataSink, MessageConsumer, SinkError};
use crate::domain::lifecycle::LifecycleState;
use crate::domain::market_data::{ConsumedRecord, MarketDataEvent};
use crate::domain::topic::{MARKET_DATA_TOPIC, TRADING_MODEL_GROUP};
use crate::infrastructure::metrics;

/// Reader settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Topic to subscribe to.
    pub topic: String,
    /// Consumer group.
    pub group_id: String,
    /// Start a fresh group at the earliest retained record.
    pub from_beginning: bool,
    /// Backoff for broker receive errors.
    pub retry: RetryConfig,
    /// Backoff for sink delivery failures.
    pub delivery_retry: RetryConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            topic: MARKET_DATA_TOPIC.to_string(),
            group_id: TRADING_MODEL_GROUP.to_string(),
            from_beginning: true,
            retry: RetryConfig {
                max_retries: Some(10),
                ..RetryConfig::default()
            },
            delivery_retry: RetryConfig {
                max_retries: Some(3),
                ..RetryConfig::default()
            },
        }
    }
}

/// Errors that end the reader task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    /// The consumer could not be created.
    #[error("consumer unavailable: {0}")]
    Handle(BrokerError),

    /// The consumer connection could not be opened.
    #[error("consumer connection failed: {0}")]
    Connect(BrokerError),

    /// Joining the group or subscribing failed.
    #[error("subscribe to '{topic}' failed: {source}")]
    Subscribe {
        /// Topic name.
        topic: String,
        /// Underlying broker error.
        source: BrokerError,
    },

    /// Receive kept failing after every retry.
    #[error("receive failed after {retries} retries: {source}")]
    ReceiveExhausted {
        /// Retries attempted.
        retries: u32,
        /// Last broker error.
        source: BrokerError,
    },

    /// The sink refused a record after every retry; its offset was left
    /// uncommitted.
    #[error("delivery of partition {partition} offset {offset} failed: {source}")]
    DeliveryFailed {
        /// Partition of the undelivered record.
        partition: i32,
        /// Offset of the undelivered record.
        offset: i64,
        /// Last sink error.
        source: SinkError,
    },
}

/// Consumer-group reader feeding a sink.
pub struct MarketDataReader {
    consumer: Box<dyn MessageConsumer>,
    sink: Arc<dyn MarketDataSink>,
    config: ReaderConfig,
    status: Arc<ReaderStatus>,
}

impl MarketDataReader {
    /// Create a reader over an unconnected consumer handle.
    #[must_use]
    pub fn new(
        consumer: Box<dyn MessageConsumer>,
        sink: Arc<dyn MarketDataSink>,
        config: ReaderConfig,
        status: Arc<ReaderStatus>,
    ) -> Self {
        Self {
            consumer,
            sink,
            config,
            status,
        }
    }

    /// Connect, subscribe and deliver records until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `ReaderError` if connecting or subscribing fails, if receive
    /// errors outlast the retry budget, or if the sink keeps refusing a record.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ReaderError> {
        if let Err(e) = self.consumer.connect().await {
            self.stop(Some(e.to_string())).await;
            return Err(ReaderError::Connect(e));
        }

        if let Err(source) = self
            .consumer
            .subscribe(&self.config.topic, self.config.from_beginning)
            .await
        {
            self.stop(Some(source.to_string())).await;
            return Err(ReaderError::Subscribe {
                topic: self.config.topic.clone(),
                source,
            });
        }

        self.status.task().set_state(LifecycleState::Running);
        tracing::info!(
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            from_beginning = self.config.from_beginning,
            "Market data reader started"
        );

        let result = self.consume(&cancel).await;

        let error = result.as_ref().err().map(ToString::to_string);
        self.stop(error).await;
        tracing::info!(delivered = self.status.delivered(), "Market data reader stopped");
        result
    }

    async fn consume(&mut self, cancel: &CancellationToken) -> Result<(), ReaderError> {
        let mut policy = RetryPolicy::new(self.config.retry.clone());

        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                received = self.consumer.recv() => received,
            };

            match received {
                Ok(record) => {
                    policy.reset();
                    self.handle(record, cancel).await?;
                }
                Err(source) => {
                    metrics::record_receive_error();
                    self.status.task().set_error(source.to_string());

                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(error = %source, "Receive retries exhausted");
                        return Err(ReaderError::ReceiveExhausted {
                            retries: policy.retry_count(),
                            source,
                        });
                    };

                    tracing::warn!(
                        error = %source,
                        retry = policy.retry_count(),
                        delay_ms = delay.as_millis(),
                        "Receive failed, retrying"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        record: ConsumedRecord,
        cancel: &CancellationToken,
    ) -> Result<(), ReaderError> {
        self.status.record_received();
        metrics::record_record_consumed(record.partition);

        let event = match MarketDataEvent::decode(&record) {
            Ok(event) => event,
            Err(e) => {
                metrics::record_decode_failure();
                self.status.record_decode_failure(e.to_string());
                tracing::warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping malformed market data record"
                );
                self.commit(&record).await;
                return Ok(());
            }
        };

        let mut policy = RetryPolicy::new(self.config.delivery_retry.clone());
        loop {
            let source = match self.sink.deliver(event.clone()).await {
                Ok(()) => break,
                Err(source) => source,
            };

            metrics::record_sink_failure();
            self.status.record_sink_failure(source.to_string());

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %source,
                    "Sink delivery retries exhausted, offset not committed"
                );
                return Err(ReaderError::DeliveryFailed {
                    partition: record.partition,
                    offset: record.offset,
                    source,
                });
            };

            tracing::warn!(
                partition = record.partition,
                offset = record.offset,
                error = %source,
                retry = policy.retry_count(),
                delay_ms = delay.as_millis(),
                "Sink rejected market data, retrying"
            );
            tokio::select! {
                biased;
                // Uncommitted, so the next session reads it again.
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }

        metrics::record_event_delivered();
        self.status.record_delivered();
        tracing::debug!(
            partition = record.partition,
            offset = record.offset,
            "Market data delivered"
        );
        self.commit(&record).await;
        Ok(())
    }

    async fn commit(&mut self, record: &ConsumedRecord) {
        if let Err(e) = self.consumer.commit(record).await {
            metrics::record_commit_failure();
            self.status.record_commit_failure(e.to_string());
            tracing::warn!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Offset commit failed"
            );
        }
    }

    async fn stop(&mut self, error: Option<String>) {
        self.status.task().set_state(LifecycleState::Draining);
        if let Some(error) = error {
            self.status.task().set_error(error);
        }
        if let Err(e) = self.consumer.disconnect().await {
            tracing::warn!(error = %e, "Consumer disconnect failed");
        }
        self.status.task().set_state(LifecycleState::Stopped);
    }
}

impl std::fmt::Debug for MarketDataReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataReader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
