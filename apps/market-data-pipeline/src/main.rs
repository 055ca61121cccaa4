//! Market Data Pipeline Binary
//!
//! Provisions the market data topic, then runs the quote publisher and the
//! consumer-group reader until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-pipeline
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `API_KEY`: Quote API key
//!
//! ## Optional
//! - `KAFKA_BROKERS`: Bootstrap servers (default: localhost:9092)
//! - `BROKER_BACKEND`: kafka | memory (default: kafka)
//! - `QUOTE_SYMBOL`: Ticker to poll (default: AAPL)
//! - `POLL_INTERVAL_MS`: Publisher interval (default: 1000)
//! - `MARKET_DATA_TOPIC`: Topic name (default: market-data)
//! - `CONSUMER_GROUP_ID`: Reader group (default: trading-model)
//! - `SUPERVISOR_POLICY`: restart | shutdown (default: restart)
//! - `PIPELINE_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_data_pipeline::application::ports::{MarketDataSink, QuoteSource};
use market_data_pipeline::infrastructure::health::{HealthServer, HealthServerState};
use market_data_pipeline::infrastructure::telemetry;
use market_data_pipeline::{
    BroadcastConfig, BrokerBackend, FinnhubConfig, FinnhubQuoteSource, InMemoryBroker,
    KafkaBrokerClient, LoggingSink, MarketDataEvent, MarketDataHub, Orchestrator,
    OrchestratorError, PipelineConfig, SharedBrokerConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Extra time granted to the orchestrator beyond its own drain budget.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market data pipeline");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connector = build_connector(&config)?;
    let source: Arc<dyn QuoteSource> = Arc::new(
        FinnhubQuoteSource::new(FinnhubConfig::from(&config))
            .context("failed to build quote API client")?,
    );

    // Decoded events fan out through the hub; one subscriber logs them
    let hub = Arc::new(MarketDataHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));
    let log_rx = hub.subscribe();
    let log_token = shutdown_token.clone();
    tokio::spawn(async move {
        log_events(log_rx, log_token).await;
    });

    let sink: Arc<dyn MarketDataSink> = hub.clone();
    let orchestrator = Orchestrator::new(connector, source, sink, config.orchestrator_config());

    if config.server.health_port != 0 {
        let health_state = HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            config.topic.name.clone(),
            orchestrator.publisher_status(),
            orchestrator.reader_status(),
        )
        .with_hub(Arc::clone(&hub));
        let health_server = HealthServer::new(
            config.server.health_port,
            Arc::new(health_state),
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let mut pipeline = orchestrator.start(shutdown_token.clone());

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        joined = &mut pipeline => {
            // Pipeline ended on its own: provisioning failed or the supervisor gave up.
            shutdown_token.cancel();
            return finish(joined);
        }
    }

    let grace = config.supervisor.shutdown_timeout + SHUTDOWN_GRACE;
    if let Ok(joined) = tokio::time::timeout(grace, pipeline).await {
        finish(joined)
    } else {
        tracing::error!(timeout_secs = grace.as_secs(), "Pipeline did not stop in time");
        anyhow::bail!("pipeline did not stop within {}s", grace.as_secs())
    }
}

fn build_connector(config: &PipelineConfig) -> anyhow::Result<SharedBrokerConnector> {
    match config.broker.backend {
        BrokerBackend::Kafka => {
            let client = KafkaBrokerClient::new(
                &config.broker.bootstrap_servers,
                config.broker.client_id.clone(),
            )
            .context("invalid Kafka bootstrap servers")?;
            tracing::info!(
                bootstrap_servers = client.bootstrap_servers(),
                "Using Kafka broker"
            );
            Ok(Arc::new(client))
        }
        BrokerBackend::Memory => {
            tracing::warn!("Using in-memory broker, records do not outlive the process");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

fn finish(joined: Result<Result<(), OrchestratorError>, JoinError>) -> anyhow::Result<()> {
    joined.context("pipeline task panicked")??;
    tracing::info!("Market data pipeline stopped");
    Ok(())
}

/// Log every event published on the hub until shutdown.
async fn log_events(mut rx: broadcast::Receiver<MarketDataEvent>, cancel: CancellationToken) {
    let sink = LoggingSink;
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return,
            received = rx.recv() => received,
        };

        match received {
            Ok(event) => {
                let _ = sink.deliver(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind the hub");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &PipelineConfig) {
    tracing::info!(
        backend = config.broker.backend.as_str(),
        topic = %config.topic.name,
        partitions = config.topic.partitions,
        group = %config.topic.consumer_group,
        symbol = %config.publisher.symbol,
        poll_interval_ms = config.publisher.poll_interval.as_millis(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        credentials = ?config.credentials,
        quote_api_url = %config.publisher.quote_api_url,
        "Quote API endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!("Graceful shutdown started");
}
