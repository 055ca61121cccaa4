//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting pipeline task status and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (both tasks running)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    PublisherSnapshot, PublisherStatus, ReaderSnapshot, ReaderStatus,
};
use crate::domain::lifecycle::LifecycleState;
use crate::infrastructure::broadcast::{BroadcastStats, SharedMarketDataHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Topic the pipeline runs over.
    pub topic: String,
    /// Publisher task status.
    pub publisher: PublisherSnapshot,
    /// Reader task status.
    pub reader: ReaderSnapshot,
    /// Fan-out statistics, when a hub is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastStats>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both tasks running.
    Healthy,
    /// One task running.
    Degraded,
    /// No task running.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    topic: String,
    started_at: Instant,
    publisher: Arc<PublisherStatus>,
    reader: Arc<ReaderStatus>,
    hub: Option<SharedMarketDataHub>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        topic: String,
        publisher: Arc<PublisherStatus>,
        reader: Arc<ReaderStatus>,
    ) -> Self {
        Self {
            version,
            topic,
            started_at: Instant::now(),
            publisher,
            reader,
            hub: None,
        }
    }

    /// Report fan-out statistics from this hub.
    #[must_use]
    pub fn with_hub(mut self, hub: SharedMarketDataHub) -> Self {
        self.hub = Some(hub);
        self
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let status = determine_health_status(
        state.publisher.task().state(),
        state.reader.task().state(),
    );

    if status == HealthStatus::Healthy {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let publisher = state.publisher.snapshot();
    let reader = state.reader.snapshot();

    HealthResponse {
        status: determine_health_status(publisher.state, reader.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        topic: state.topic.clone(),
        publisher,
        reader,
        broadcast: state.hub.as_ref().map(|hub| hub.stats()),
    }
}

fn determine_health_status(publisher: LifecycleState, reader: LifecycleState) -> HealthStatus {
    let running = [publisher, reader]
        .iter()
        .filter(|&&s| s == LifecycleState::Running)
        .count();

    match running {
        2 => HealthStatus::Healthy,
        1 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::broadcast::MarketDataHub;

    fn state() -> (Arc<PublisherStatus>, Arc<ReaderStatus>, Arc<HealthServerState>) {
        let publisher = Arc::new(PublisherStatus::new());
        let reader = Arc::new(ReaderStatus::new());
        let state = HealthServerState::new(
            "0.1.0".to_string(),
            "market-data".to_string(),
            Arc::clone(&publisher),
            Arc::clone(&reader),
        )
        .with_hub(Arc::new(MarketDataHub::with_defaults()));
        (publisher, reader, Arc::new(state))
    }

    async fn get(state: Arc<HealthServerState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_counts_running_tasks() {
        use LifecycleState::{Created, Draining, Running, Stopped};

        assert_eq!(determine_health_status(Running, Running), HealthStatus::Healthy);
        assert_eq!(determine_health_status(Running, Stopped), HealthStatus::Degraded);
        assert_eq!(determine_health_status(Draining, Running), HealthStatus::Degraded);
        assert_eq!(determine_health_status(Created, Stopped), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_always_ok() {
        let (_, _, state) = state();
        let (status, body) = get(state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_requires_both_tasks() {
        let (publisher, reader, state) = state();

        let (status, _) = get(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        publisher.task().set_state(LifecycleState::Running);
        let (status, _) = get(Arc::clone(&state), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        reader.task().set_state(LifecycleState::Running);
        let (status, body) = get(state, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_task_snapshots() {
        let (publisher, reader, state) = state();
        publisher.task().set_state(LifecycleState::Running);
        publisher.record_published();
        reader.task().set_state(LifecycleState::Running);

        let (status, body) = get(state, "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["topic"], "market-data");
        assert_eq!(json["publisher"]["state"], "running");
        assert_eq!(json["publisher"]["published"], 1);
        assert_eq!(json["reader"]["delivered"], 0);
        assert_eq!(json["broadcast"]["receivers"], 0);
    }

    #[tokio::test]
    async fn health_is_unavailable_when_nothing_runs() {
        let (_, _, state) = state();
        let (status, body) = get(state, "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "unhealthy");
    }
}
