//! Task Status
//!
//! Shared, lock-light status for the publisher and reader tasks. The
//! orchestrator owns one status per role and hands it to every incarnation of
//! that task, so counters survive restarts. The health server reads them.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::lifecycle::{Lifecycle, LifecycleState, TaskRole};
use crate::infrastructure::metrics;

// =============================================================================
// Task Status
// =============================================================================

/// Lifecycle and error tracking common to both tasks.
#[derive(Debug)]
pub struct TaskStatus {
    role: TaskRole,
    lifecycle: Lifecycle,
    restarts: AtomicU32,
    last_error: RwLock<Option<String>>,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

impl TaskStatus {
    /// Create a status for `role` in the `Created` state.
    #[must_use]
    pub fn new(role: TaskRole) -> Self {
        Self {
            role,
            lifecycle: Lifecycle::new(),
            restarts: AtomicU32::new(0),
            last_error: RwLock::new(None),
            last_activity: RwLock::new(None),
        }
    }

    /// Task this status belongs to.
    #[must_use]
    pub const fn role(&self) -> TaskRole {
        self.role
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Move to a new lifecycle state.
    pub fn set_state(&self, state: LifecycleState) {
        let previous = self.lifecycle.set(state);
        if previous != state {
            metrics::set_task_state(self.role, state);
            tracing::debug!(
                task = %self.role,
                from = %previous,
                to = %state,
                "Task lifecycle transition"
            );
        }
    }

    /// Record the most recent error.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Most recent error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Record that the task did useful work just now.
    pub fn touch(&self) {
        *self.last_activity.write() = Some(Utc::now());
    }

    /// Time of the last useful work.
    #[must_use]
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.read()
    }

    /// Count a supervisor restart.
    pub fn increment_restarts(&self) -> u32 {
        metrics::record_task_restart(self.role);
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of supervisor restarts.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Publisher Status
// =============================================================================

/// Publisher counters.
#[derive(Debug)]
pub struct PublisherStatus {
    task: TaskStatus,
    ticks: AtomicU64,
    published: AtomicU64,
    fetch_failures: AtomicU64,
    publish_failures: AtomicU64,
    panicked_cycles: AtomicU64,
}

impl PublisherStatus {
    /// Create a new status.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task: TaskStatus::new(TaskRole::Publisher),
            ticks: AtomicU64::new(0),
            published: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            panicked_cycles: AtomicU64::new(0),
        }
    }

    /// Lifecycle and error tracking.
    #[must_use]
    pub const fn task(&self) -> &TaskStatus {
        &self.task
    }

    /// Count a timer tick.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a published quote.
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.task.touch();
    }

    /// Count a failed fetch.
    pub fn record_fetch_failure(&self, message: impl Into<String>) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Count a tick abandoned after publish retries.
    pub fn record_publish_failure(&self, message: impl Into<String>) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Count a cycle that panicked.
    pub fn record_panicked_cycle(&self, message: impl Into<String>) {
        self.panicked_cycles.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Number of published quotes.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            state: self.task.state(),
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published(),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            panicked_cycles: self.panicked_cycles.load(Ordering::Relaxed),
            restarts: self.task.restarts(),
            last_error: self.task.last_error(),
            last_published_at: self.task.last_activity(),
        }
    }
}

impl Default for PublisherStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable publisher counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublisherSnapshot {
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Timer ticks observed.
    pub ticks: u64,
    /// Quotes published.
    pub published: u64,
    /// Cycles skipped because the fetch failed.
    pub fetch_failures: u64,
    /// Cycles abandoned after publish retries.
    pub publish_failures: u64,
    /// Cycles that panicked.
    pub panicked_cycles: u64,
    /// Supervisor restarts.
    pub restarts: u32,
    /// Most recent error.
    pub last_error: Option<String>,
    /// Time of the last successful publish.
    pub last_published_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Reader Status
// =============================================================================

/// Reader counters.
#[derive(Debug)]
pub struct ReaderStatus {
    task: TaskStatus,
    received: AtomicU64,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
    sink_failures: AtomicU64,
    commit_failures: AtomicU64,
}

impl ReaderStatus {
    /// Create a new status.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task: TaskStatus::new(TaskRole::Reader),
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
        }
    }

    /// Lifecycle and error tracking.
    #[must_use]
    pub const fn task(&self) -> &TaskStatus {
        &self.task
    }

    /// Count a received record.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.task.touch();
    }

    /// Count an event handed to the sink.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a record dropped because its payload did not decode.
    pub fn record_decode_failure(&self, message: impl Into<String>) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Count an event the sink refused.
    pub fn record_sink_failure(&self, message: impl Into<String>) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Count a failed offset commit.
    pub fn record_commit_failure(&self, message: impl Into<String>) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
        self.task.set_error(message);
    }

    /// Number of events handed to the sink.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of records dropped as malformed.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> ReaderSnapshot {
        ReaderSnapshot {
            state: self.task.state(),
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered(),
            decode_failures: self.decode_failures(),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            restarts: self.task.restarts(),
            last_error: self.task.last_error(),
            last_received_at: self.task.last_activity(),
        }
    }
}

impl Default for ReaderStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable reader counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReaderSnapshot {
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Records received from the broker.
    pub received: u64,
    /// Events handed to the sink.
    pub delivered: u64,
    /// Records dropped as malformed.
    pub decode_failures: u64,
    /// Events the sink refused.
    pub sink_failures: u64,
    /// Failed offset commits.
    pub commit_failures: u64,
    /// Supervisor restarts.
    pub restarts: u32,
    /// Most recent error.
    pub last_error: Option<String>,
    /// Time of the last received record.
    pub last_received_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_counters_accumulate() {
        let status = PublisherStatus::new();
        status.record_tick();
        status.record_tick();
        status.record_published();
        status.record_fetch_failure("timeout");

        let snapshot = status.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.fetch_failures, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("timeout"));
        assert!(snapshot.last_published_at.is_some());
        assert_eq!(snapshot.state, LifecycleState::Created);
    }

    #[test]
    fn reader_counters_accumulate() {
        let status = ReaderStatus::new();
        status.record_received();
        status.record_received();
        status.record_delivered();
        status.record_decode_failure("bad json");

        let snapshot = status.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(status.decode_failures(), 1);
    }

    #[test]
    fn restarts_are_counted_on_the_task() {
        let status = ReaderStatus::new();
        assert_eq!(status.task().increment_restarts(), 1);
        assert_eq!(status.task().increment_restarts(), 2);
        assert_eq!(status.snapshot().restarts, 2);
        assert_eq!(status.task().role(), TaskRole::Reader);
    }
}
