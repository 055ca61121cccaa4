//! Task Lifecycle
//!
//! Long-lived pipeline tasks (publisher, reader) move through
//! `Created → Running → Draining → Stopped`. A restarted task re-enters
//! `Running` from `Stopped`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, not yet connected.
    #[default]
    Created,
    /// Connected and processing.
    Running,
    /// Cancellation observed; finishing in-flight work and releasing the connection.
    Draining,
    /// Connection released; no further work.
    Stopped,
}

impl LifecycleState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Stopped => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Stopped,
            _ => Self::Created,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The long-lived tasks run by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
    /// Polls the quote API and publishes to the topic.
    Publisher,
    /// Consumes the topic and feeds the sink.
    Reader,
}

impl TaskRole {
    /// Get the role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Reader => "reader",
        }
    }
}

impl std::fmt::Display for TaskRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for a task's lifecycle state.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Create a lifecycle in the `Created` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to a new state, returning the previous one.
    pub fn set(&self, state: LifecycleState) -> LifecycleState {
        LifecycleState::from_u8(self.state.swap(state.to_u8(), Ordering::AcqRel))
    }

    /// Whether the task is processing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.get() == LifecycleState::Running
    }
}
