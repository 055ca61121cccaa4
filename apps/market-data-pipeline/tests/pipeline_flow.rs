//! Pipeline Flow Integration Tests
//!
//! Runs the full orchestrator over the in-memory broker with a scripted
//! quote source and a channel sink, on paused time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use market_data_pipeline::{
    ChannelSink, InMemoryBroker, LifecycleState, MarketDataEvent, Orchestrator,
    OrchestratorConfig, PublisherConfig, QuoteFetchError, QuoteSource, RawQuote, RetryConfig,
    TopicSpec,
};

const TOPIC: &str = "market-data";
const GROUP: &str = "trading-model";

/// Quote source answering each call from a script indexed by call number.
struct ScriptedSource {
    calls: AtomicU32,
    script: Box<dyn Fn(u32) -> Result<String, QuoteFetchError> + Send + Sync>,
}

impl ScriptedSource {
    fn new(
        script: impl Fn(u32) -> Result<String, QuoteFetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicU32::new(0),
            script: Box::new(script),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    async fn fetch_quote(&self, symbol: &str) -> Result<RawQuote, QuoteFetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(call).map(|body| RawQuote::new(symbol, body))
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        topic: TopicSpec::new(TOPIC, 2),
        publisher: PublisherConfig {
            topic: TOPIC.to_string(),
            symbol: "AAPL".to_string(),
            interval: Duration::from_millis(1000),
            retry: RetryConfig::immediate(Some(2)),
        },
        ..OrchestratorConfig::default()
    }
}

struct Running {
    broker: InMemoryBroker,
    source: Arc<ScriptedSource>,
    events: mpsc::Receiver<MarketDataEvent>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

fn start(source: ScriptedSource) -> Running {
    let broker = InMemoryBroker::new();
    let source = Arc::new(source);
    let (sink, events) = ChannelSink::new(64);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(broker.clone()),
        Arc::clone(&source) as Arc<dyn QuoteSource>,
        Arc::new(sink),
        config(),
    ));

    let cancel = CancellationToken::new();
    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(cancel).await.unwrap() })
    };

    Running {
        broker,
        source,
        events,
        orchestrator,
        cancel,
        handle,
    }
}

fn drain(events: &mut mpsc::Receiver<MarketDataEvent>) -> Vec<MarketDataEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

#[tokio::test(start_paused = true)]
async fn quote_reaches_sink_exactly_once() {
    let mut running = start(ScriptedSource::new(|call| {
        if call == 1 {
            Ok(r#"{"symbol":"AAPL","price":150.2}"#.to_string())
        } else {
            Err(QuoteFetchError::RateLimited)
        }
    }));

    tokio::time::sleep(Duration::from_millis(3500)).await;
    running.cancel.cancel();
    running.handle.await.unwrap();

    let events = drain(&mut running.events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, TOPIC);
    assert_eq!(events[0].payload["symbol"], "AAPL");
    assert_eq!(events[0].payload["price"].as_f64(), Some(150.2));
    assert_eq!(running.broker.records(TOPIC).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_second_interval_publishes_two_to_four_quotes_in_three_seconds() {
    let running = start(ScriptedSource::new(|_| {
        Ok(r#"{"symbol":"AAPL","price":150.2}"#.to_string())
    }));

    tokio::time::sleep(Duration::from_secs(3)).await;
    let published = running.broker.records(TOPIC).len();
    running.cancel.cancel();
    running.handle.await.unwrap();

    assert!((2..=4).contains(&published), "published {published}");
}

#[tokio::test(start_paused = true)]
async fn fetch_errors_do_not_stop_later_ticks() {
    let mut running = start(ScriptedSource::new(|call| {
        if call % 2 == 1 {
            Err(QuoteFetchError::Timeout)
        } else {
            Ok(format!(r#"{{"call":{call}}}"#))
        }
    }));

    tokio::time::sleep(Duration::from_millis(4500)).await;
    running.cancel.cancel();
    running.handle.await.unwrap();

    assert_eq!(running.source.calls(), 4);
    let calls: Vec<_> = drain(&mut running.events)
        .into_iter()
        .map(|event| event.payload["call"].as_u64().unwrap())
        .collect();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&2));
    assert!(calls.contains(&4));

    let snapshot = running.orchestrator.publisher_status().snapshot();
    assert_eq!(snapshot.fetch_failures, 2);
    assert_eq!(snapshot.published, 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_skipped_and_committed() {
    let mut running = start(ScriptedSource::new(|call| match call {
        1 => Ok("not json".to_string()),
        _ => Ok(format!(r#"{{"symbol":"AAPL","seq":{call}}}"#)),
    }));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    running.cancel.cancel();
    running.handle.await.unwrap();

    let events = drain(&mut running.events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["seq"], 2);

    let reader = running.orchestrator.reader_status();
    assert_eq!(reader.decode_failures(), 1);
    assert_eq!(reader.delivered(), 1);

    // Both records are behind the group position, across whichever partitions they landed on.
    let committed: i64 = (0..2)
        .filter_map(|partition| running.broker.committed_offset(GROUP, TOPIC, partition))
        .sum();
    assert_eq!(committed, 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_both_tasks() {
    let running = start(ScriptedSource::new(|_| Ok("{}".to_string())));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let publisher = running.orchestrator.publisher_status();
    let reader = running.orchestrator.reader_status();
    assert_eq!(publisher.task().state(), LifecycleState::Running);
    assert_eq!(reader.task().state(), LifecycleState::Running);

    running.cancel.cancel();
    running.handle.await.unwrap();

    assert_eq!(publisher.task().state(), LifecycleState::Stopped);
    assert_eq!(reader.task().state(), LifecycleState::Stopped);
    assert_eq!(running.broker.partition_count(TOPIC), Some(2));
}
