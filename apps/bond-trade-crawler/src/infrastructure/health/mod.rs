//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, worker status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status with one entry per worker
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready once any worker is polling)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{WorkerSnapshot, WorkerStatus};
use crate::domain::supervisor::SupervisorState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Crawler version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Per-worker status.
    pub workers: Vec<WorkerSnapshot>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every worker is polling.
    Healthy,
    /// Some workers polling or still starting.
    Degraded,
    /// No worker can make progress.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    workers: Vec<Arc<WorkerStatus>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, workers: Vec<Arc<WorkerStatus>>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            workers,
        }
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

/// Build the health router.
pub fn router(state: Arc<HealthServerState>) -> Router {
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
    let is_ready = state.workers.iter().any(|w| w.state().is_polling());

    if is_ready {
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
    let workers: Vec<WorkerSnapshot> = state.workers.iter().map(|w| w.snapshot()).collect();
    let states: Vec<SupervisorState> = workers.iter().map(|w| w.state).collect();

    HealthResponse {
        status: determine_health_status(&states),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        workers,
    }
}

fn determine_health_status(states: &[SupervisorState]) -> HealthStatus {
    let polling = states.iter().filter(|s| s.is_polling()).count();
    let live = states.iter().filter(|s| !s.is_terminal()).count();

    if !states.is_empty() && polling == states.len() {
        HealthStatus::Healthy
    } else if live > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
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
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::supervisor::FatalReason;

    fn worker(id: usize, path: &[SupervisorState]) -> Arc<WorkerStatus> {
        let status = Arc::new(WorkerStatus::new(id, 9050 + u16::try_from(id).unwrap()));
        for state in path {
            assert!(status.transition(*state));
        }
        status
    }

    const POLLING: &[SupervisorState] = &[
        SupervisorState::CircuitPending,
        SupervisorState::Authenticating,
        SupervisorState::Polling,
    ];

    const FAILED: &[SupervisorState] = &[
        SupervisorState::CircuitPending,
        SupervisorState::Terminated(FatalReason::CircuitFailed),
    ];

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_all_polling() {
        let states = [SupervisorState::Polling, SupervisorState::Polling];
        assert_eq!(determine_health_status(&states), HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_partial() {
        let states = [
            SupervisorState::Polling,
            SupervisorState::Terminated(FatalReason::LoginAttemptsExceeded),
        ];
        assert_eq!(determine_health_status(&states), HealthStatus::Degraded);
        assert_eq!(
            determine_health_status(&[SupervisorState::CircuitPending]),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn determine_status_all_terminated() {
        let states = [
            SupervisorState::Terminated(FatalReason::CircuitFailed),
            SupervisorState::Stopped,
        ];
        assert_eq!(determine_health_status(&states), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn readyz_reflects_polling_workers() {
        let ready = router(Arc::new(HealthServerState::new(
            "test".to_string(),
            vec![worker(0, POLLING), worker(1, FAILED)],
        )));
        let response = ready
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let not_ready = router(Arc::new(HealthServerState::new(
            "test".to_string(),
            vec![worker(0, FAILED)],
        )));
        let response = not_ready
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_lists_workers() {
        let app = router(Arc::new(HealthServerState::new(
            "test".to_string(),
            vec![worker(0, POLLING), worker(1, FAILED)],
        )));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["workers"][0]["state"]["state"], "polling");
        assert_eq!(json["workers"][1]["state"]["reason"], "circuit_failed");
        assert_eq!(json["workers"][1]["proxy_port"], 9051);
    }
}
