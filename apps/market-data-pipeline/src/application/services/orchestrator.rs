//! Pipeline Orchestrator
//!
//! Provisions the topic, then runs the publisher and reader as independent,
//! supervised tasks until shutdown.
//!
//! Each task gets its own child cancellation token and its own broker
//! connection. When a task terminates on its own (error, panic, or a clean
//! exit nobody asked for) the supervisor policy decides between restarting it
//! and shutting the whole pipeline down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::provisioner::{ProvisionError, TopicProvisioner};
use super::publisher::{PublisherConfig, PublisherError, QuotePublisher};
use super::reader::{MarketDataReader, ReaderConfig, ReaderError};
use super::status::{PublisherStatus, ReaderStatus, TaskStatus};
use crate::application::ports::{MarketDataSink, QuoteSource, SharedBrokerConnector};
use crate::domain::lifecycle::TaskRole;
use crate::domain::topic::TopicSpec;

// =============================================================================
// Configuration
// =============================================================================

/// What to do when a pipeline task terminates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPolicy {
    /// Restart the task after `delay`, at most `max_restarts` times per task.
    Restart {
        /// Restart budget per task.
        max_restarts: u32,
        /// Pause before each restart.
        delay: Duration,
    },
    /// Stop the other task and return an error.
    ShutdownAll,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self::Restart {
            max_restarts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Topic to provision before starting.
    pub topic: TopicSpec,
    /// Publisher settings.
    pub publisher: PublisherConfig,
    /// Reader settings.
    pub reader: ReaderConfig,
    /// Supervision policy for both tasks.
    pub supervisor: SupervisorPolicy,
    /// Time allowed for both tasks to drain on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            topic: TopicSpec::default(),
            publisher: PublisherConfig::default(),
            reader: ReaderConfig::default(),
            supervisor: SupervisorPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Orchestrator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// Topic provisioning failed; no task was started.
    #[error("startup aborted: {0}")]
    Provision(#[from] ProvisionError),

    /// A task terminated and the supervisor gave up on it.
    #[error("{role} task failed after {restarts} restarts: {reason}")]
    TaskFailed {
        /// Failed task.
        role: TaskRole,
        /// Restarts spent on it.
        restarts: u32,
        /// Last termination reason.
        reason: String,
    },
}

type TaskResult = Result<(), String>;

/// A running task and its bookkeeping.
struct Supervised {
    role: TaskRole,
    token: CancellationToken,
    handle: Option<JoinHandle<TaskResult>>,
    restarts: u32,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Sequences provisioning and supervises the publisher and reader.
pub struct Orchestrator {
    connector: SharedBrokerConnector,
    source: Arc<dyn QuoteSource>,
    sink: Arc<dyn MarketDataSink>,
    config: OrchestratorConfig,
    publisher_status: Arc<PublisherStatus>,
    reader_status: Arc<ReaderStatus>,
}

impl Orchestrator {
    /// Create an orchestrator. Nothing connects until `run`.
    #[must_use]
    pub fn new(
        connector: SharedBrokerConnector,
        source: Arc<dyn QuoteSource>,
        sink: Arc<dyn MarketDataSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            connector,
            source,
            sink,
            config,
            publisher_status: Arc::new(PublisherStatus::new()),
            reader_status: Arc::new(ReaderStatus::new()),
        }
    }

    /// Publisher status, shared across restarts.
    #[must_use]
    pub fn publisher_status(&self) -> Arc<PublisherStatus> {
        Arc::clone(&self.publisher_status)
    }

    /// Reader status, shared across restarts.
    #[must_use]
    pub fn reader_status(&self) -> Arc<ReaderStatus> {
        Arc::clone(&self.reader_status)
    }

    /// Spawn `run` onto the runtime.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<Result<(), OrchestratorError>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Provision the topic, then run both tasks until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `OrchestratorError::Provision` if the topic cannot be ensured,
    /// or `OrchestratorError::TaskFailed` once the supervisor gives up on a
    /// task. In the latter case the other task has already been stopped.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), OrchestratorError> {
        let provisioner = TopicProvisioner::new(Arc::clone(&self.connector));
        if let Err(e) = provisioner.ensure_topic(&self.config.topic).await {
            tracing::error!(error = %e, "Topic provisioning failed, not starting pipeline");
            return Err(e.into());
        }

        let mut publisher = self.launch(TaskRole::Publisher, &cancel);
        let mut reader = self.launch(TaskRole::Reader, &cancel);
        tracing::info!(supervisor = ?self.config.supervisor, "Pipeline running");

        loop {
            let (role, joined) = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Pipeline shutdown requested");
                    self.shutdown(&mut publisher, &mut reader).await;
                    return Ok(());
                }
                joined = wait(&mut publisher.handle) => (TaskRole::Publisher, joined),
                joined = wait(&mut reader.handle) => (TaskRole::Reader, joined),
            };

            // A task draining on a shutdown it observed first is not a failure.
            if cancel.is_cancelled() {
                tracing::info!(task = %role, "Pipeline shutdown requested");
                self.shutdown(&mut publisher, &mut reader).await;
                return Ok(());
            }

            let reason = describe_exit(joined);
            let (failed, other) = match role {
                TaskRole::Publisher => (&mut publisher, &mut reader),
                TaskRole::Reader => (&mut reader, &mut publisher),
            };
            self.task_status(role).set_error(reason.clone());
            tracing::error!(task = %role, reason = %reason, "Pipeline task terminated");

            match self.config.supervisor {
                SupervisorPolicy::Restart {
                    max_restarts,
                    delay,
                } if failed.restarts < max_restarts => {
                    failed.restarts += 1;
                    self.task_status(role).increment_restarts();
                    tracing::warn!(
                        task = %role,
                        restart = failed.restarts,
                        max_restarts,
                        delay_ms = delay.as_millis(),
                        "Restarting pipeline task"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.shutdown(failed, other).await;
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    let token = cancel.child_token();
                    failed.handle = Some(self.spawn_task(role, token.clone()));
                    failed.token = token;
                }
                _ => {
                    let restarts = failed.restarts;
                    tracing::error!(
                        task = %role,
                        restarts,
                        "Supervisor giving up, stopping pipeline"
                    );
                    self.shutdown(failed, other).await;
                    return Err(OrchestratorError::TaskFailed {
                        role,
                        restarts,
                        reason,
                    });
                }
            }
        }
    }

    fn launch(&self, role: TaskRole, cancel: &CancellationToken) -> Supervised {
        let token = cancel.child_token();
        Supervised {
            role,
            handle: Some(self.spawn_task(role, token.clone())),
            token,
            restarts: 0,
        }
    }

    fn spawn_task(&self, role: TaskRole, token: CancellationToken) -> JoinHandle<TaskResult> {
        match role {
            TaskRole::Publisher => {
                let task = run_publisher(
                    Arc::clone(&self.connector),
                    Arc::clone(&self.source),
                    self.config.publisher.clone(),
                    Arc::clone(&self.publisher_status),
                    token,
                );
                tokio::spawn(async move { task.await.map_err(|e| e.to_string()) })
            }
            TaskRole::Reader => {
                let task = run_reader(
                    Arc::clone(&self.connector),
                    Arc::clone(&self.sink),
                    self.config.reader.clone(),
                    Arc::clone(&self.reader_status),
                    token,
                );
                tokio::spawn(async move { task.await.map_err(|e| e.to_string()) })
            }
        }
    }

    fn task_status(&self, role: TaskRole) -> &TaskStatus {
        match role {
            TaskRole::Publisher => self.publisher_status.task(),
            TaskRole::Reader => self.reader_status.task(),
        }
    }

    /// Cancel both tasks and wait for them to drain, aborting stragglers.
    async fn shutdown(&self, first: &mut Supervised, second: &mut Supervised) {
        first.token.cancel();
        second.token.cancel();

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            for task in [&mut *first, &mut *second] {
                if let Some(handle) = task.handle.as_mut() {
                    match handle.await {
                        Ok(Ok(())) => {
                            tracing::info!(task = %task.role, "Pipeline task drained");
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(
                                task = %task.role,
                                error = %e,
                                "Pipeline task stopped with error"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(task = %task.role, error = %e, "Pipeline task aborted");
                        }
                    }
                    task.handle = None;
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout reached, aborting remaining tasks"
            );
            for task in [first, second] {
                if let Some(handle) = task.handle.take() {
                    handle.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn run_publisher(
    connector: SharedBrokerConnector,
    source: Arc<dyn QuoteSource>,
    config: PublisherConfig,
    status: Arc<PublisherStatus>,
    token: CancellationToken,
) -> Result<(), PublisherError> {
    let producer = connector.producer().map_err(PublisherError::Handle)?;
    QuotePublisher::new(producer, source, config, status)
        .run(token)
        .await
}

async fn run_reader(
    connector: SharedBrokerConnector,
    sink: Arc<dyn MarketDataSink>,
    config: ReaderConfig,
    status: Arc<ReaderStatus>,
    token: CancellationToken,
) -> Result<(), ReaderError> {
    let consumer = connector
        .consumer(&config.group_id)
        .map_err(ReaderError::Handle)?;
    MarketDataReader::new(consumer, sink, config, status)
        .run(token)
        .await
}

/// Await a task slot, emptying it once the task has finished.
///
/// Pends forever on an empty slot.
async fn wait(slot: &mut Option<JoinHandle<TaskResult>>) -> Result<TaskResult, JoinError> {
    match slot.as_mut() {
        Some(handle) => {
            let joined = handle.await;
            *slot = None;
            joined
        }
        None => std::future::pending().await,
    }
}

fn describe_exit(joined: Result<TaskResult, JoinError>) -> String {
    match joined {
        Ok(Ok(())) => "exited unexpectedly".to_string(),
        Ok(Err(e)) => e,
        Err(e) if e.is_panic() => format!("panicked: {e}"),
        Err(e) => format!("aborted: {e}"),
    }
}
