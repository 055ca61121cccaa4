//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Publisher**: Poll ticks, published quotes, fetch/publish failures
//! - **Reader**: Consumed records, decode/sink/commit failures
//! - **Tasks**: Lifecycle state and supervisor restarts
//! - **Latency**: Poll cycle and quote fetch durations
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::lifecycle::{LifecycleState, TaskRole};
use crate::domain::topic::TopicProvisioning;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Publisher
    describe_counter!(
        "market_data_poll_ticks_total",
        "Total publisher timer ticks"
    );
    describe_counter!(
        "market_data_quotes_published_total",
        "Total quotes published to the market data topic"
    );
    describe_counter!(
        "market_data_fetch_failures_total",
        "Total quote fetches that failed, by error kind"
    );
    describe_counter!(
        "market_data_publish_retries_total",
        "Total publish retries after a failed send"
    );
    describe_counter!(
        "market_data_publish_failures_total",
        "Total poll cycles abandoned after exhausting publish retries"
    );
    describe_counter!(
        "market_data_cycle_panics_total",
        "Total poll cycles that panicked"
    );

    // Reader
    describe_counter!(
        "market_data_records_consumed_total",
        "Total records received by the reader"
    );
    describe_counter!(
        "market_data_events_delivered_total",
        "Total decoded events accepted by the sink"
    );
    describe_counter!(
        "market_data_decode_failures_total",
        "Total records skipped because the payload was not valid JSON"
    );
    describe_counter!(
        "market_data_sink_failures_total",
        "Total events rejected by the sink"
    );
    describe_counter!(
        "market_data_commit_failures_total",
        "Total failed offset commits"
    );
    describe_counter!(
        "market_data_receive_errors_total",
        "Total broker receive errors"
    );

    // Fan-out
    describe_counter!(
        "market_data_events_broadcast_total",
        "Total events handed to hub subscribers"
    );

    // Tasks
    describe_gauge!(
        "market_data_task_running",
        "Whether a pipeline task is running (1) or not (0)"
    );
    describe_counter!(
        "market_data_task_restarts_total",
        "Total supervisor restarts per task"
    );
    describe_counter!(
        "market_data_topic_provisioned_total",
        "Topic provisioning outcomes"
    );

    // Latency histograms
    describe_histogram!(
        "market_data_quote_fetch_seconds",
        "Time to fetch a quote from the upstream API"
    );
    describe_histogram!(
        "market_data_poll_cycle_seconds",
        "Time from tick to publish acknowledgement"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a publisher timer tick.
pub fn record_poll_tick() {
    counter!("market_data_poll_ticks_total").increment(1);
}

/// Record a quote published to a partition.
pub fn record_quote_published(partition: i32) {
    counter!(
        "market_data_quotes_published_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record a failed quote fetch.
pub fn record_fetch_failure(kind: &'static str) {
    counter!(
        "market_data_fetch_failures_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record a publish retry.
pub fn record_publish_retry() {
    counter!("market_data_publish_retries_total").increment(1);
}

/// Record a poll cycle abandoned after publish retries.
pub fn record_publish_failure() {
    counter!("market_data_publish_failures_total").increment(1);
}

/// Record a panicked poll cycle.
pub fn record_cycle_panic() {
    counter!("market_data_cycle_panics_total").increment(1);
}

/// Record a record received by the reader.
pub fn record_record_consumed(partition: i32) {
    counter!(
        "market_data_records_consumed_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record an event accepted by the sink.
pub fn record_event_delivered() {
    counter!("market_data_events_delivered_total").increment(1);
}

/// Record a record skipped as malformed.
pub fn record_decode_failure() {
    counter!("market_data_decode_failures_total").increment(1);
}

/// Record an event rejected by the sink.
pub fn record_sink_failure() {
    counter!("market_data_sink_failures_total").increment(1);
}

/// Record a failed offset commit.
pub fn record_commit_failure() {
    counter!("market_data_commit_failures_total").increment(1);
}

/// Record a broker receive error.
pub fn record_receive_error() {
    counter!("market_data_receive_errors_total").increment(1);
}

/// Record events handed to hub subscribers.
pub fn record_events_broadcast(count: u64) {
    counter!("market_data_events_broadcast_total").increment(count);
}

/// Update the running gauge for a task.
pub fn set_task_state(role: TaskRole, state: LifecycleState) {
    let running = if state == LifecycleState::Running { 1.0 } else { 0.0 };
    gauge!(
        "market_data_task_running",
        "task" => role.as_str()
    )
    .set(running);
}

/// Record a supervisor restart.
pub fn record_task_restart(role: TaskRole) {
    counter!(
        "market_data_task_restarts_total",
        "task" => role.as_str()
    )
    .increment(1);
}

/// Record a topic provisioning outcome.
pub fn record_topic_provisioned(outcome: TopicProvisioning) {
    counter!(
        "market_data_topic_provisioned_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record quote fetch duration.
pub fn record_fetch_duration(duration: Duration) {
    histogram!("market_data_quote_fetch_seconds").record(duration.as_secs_f64());
}

/// Record poll cycle duration.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("market_data_poll_cycle_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
