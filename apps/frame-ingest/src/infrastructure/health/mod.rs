//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the stream, pipeline and client
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (event source connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::client::DatasetClient;
use crate::application::services::event_stream::{StreamState, StreamStatus};
use crate::application::services::pipeline::PipelineCounters;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Event source.
    pub stream: StreamInfo,
    /// Ingestion loop.
    pub pipeline: PipelineInfo,
    /// Remote engine client.
    pub client: ClientInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Event source connected and client open.
    Healthy,
    /// Event source temporarily unavailable.
    Degraded,
    /// Event source gave up or the client is closed.
    Unhealthy,
}

/// Event source status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connection state.
    pub state: &'static str,
    /// Whether the source is connected.
    pub connected: bool,
    /// Connection attempts so far.
    pub connect_attempts: u64,
    /// Backoff delays scheduled so far.
    pub reconnects: u64,
    /// Events forwarded.
    pub events: u64,
    /// Malformed messages skipped.
    pub malformed: u64,
}

/// Ingestion loop status.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineInfo {
    /// Events ingested.
    pub events: u64,
    /// Successful flushes.
    pub flushes: u64,
    /// Events persisted.
    pub flushed_events: u64,
    /// Flushes the engine rejected.
    pub failed_flushes: u64,
}

/// Client status.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Tracked handles.
    pub active_handles: usize,
    /// Remote calls in flight.
    pub in_flight: usize,
    /// Whether the client has been closed.
    pub closed: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    stream: Arc<StreamStatus>,
    pipeline: Arc<PipelineCounters>,
    client: Arc<DatasetClient>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        stream: Arc<StreamStatus>,
        pipeline: Arc<PipelineCounters>,
        client: Arc<DatasetClient>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            stream,
            pipeline,
            client,
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
    if state.stream.is_connected() && !state.client.is_closed() {
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
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream_state = state.stream.state();
    let closed = state.client.is_closed();

    HealthResponse {
        status: determine_health_status(stream_state, closed),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamInfo {
            state: stream_state.as_str(),
            connected: stream_state == StreamState::Connected,
            connect_attempts: state.stream.connect_attempts(),
            reconnects: state.stream.reconnects(),
            events: state.stream.events(),
            malformed: state.stream.malformed(),
        },
        pipeline: PipelineInfo {
            events: state.pipeline.events(),
            flushes: state.pipeline.flushes(),
            flushed_events: state.pipeline.flushed_events(),
            failed_flushes: state.pipeline.failed_flushes(),
        },
        client: ClientInfo {
            active_handles: state.client.active_handles().len(),
            in_flight: state.client.in_flight(),
            closed,
        },
    }
}

const fn determine_health_status(stream: StreamState, client_closed: bool) -> HealthStatus {
    if client_closed {
        return HealthStatus::Unhealthy;
    }
    match stream {
        StreamState::Connected => HealthStatus::Healthy,
        StreamState::Idle | StreamState::Connecting | StreamState::Reconnecting => {
            HealthStatus::Degraded
        }
        StreamState::Stopped | StreamState::GaveUp => HealthStatus::Unhealthy,
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
