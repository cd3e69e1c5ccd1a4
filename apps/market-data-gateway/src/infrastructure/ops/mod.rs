//! Ops HTTP Endpoint
//!
//! Health checks, gateway diagnostics, and Prometheus metrics for container
//! orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON gateway status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (checks data paths)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::MarketDataGateway;
use crate::domain::sequence::GapStats;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::resilience::{BreakerStats, HealthStatus, ProviderStatus};
use crate::infrastructure::stream::{ConnectionState, RecoveryStats, StreamStats};

// =============================================================================
// Response Types
// =============================================================================

/// Overall gateway status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    /// Both data paths operational.
    Healthy,
    /// One path degraded but data still flows.
    Degraded,
    /// No live data path available.
    Unhealthy,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct OpsHealthResponse {
    /// Overall status.
    pub status: GatewayStatus,
    /// Gateway version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Primary provider health.
    pub primary: HealthStatus,
    /// Secondary provider health.
    pub secondary: HealthStatus,
    /// Streaming-side counters.
    pub stream: StreamStats,
    /// Gap diagnostics.
    pub gaps: GapStats,
    /// Recovery scheduler counters.
    pub recovery: RecoveryStats,
    /// Circuit breaker counters.
    pub breaker: BreakerStats,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the ops server.
pub struct OpsServerState {
    version: String,
    started_at: Instant,
    gateway: Arc<MarketDataGateway>,
}

impl OpsServerState {
    /// Create new ops server state.
    #[must_use]
    pub fn new(version: String, gateway: Arc<MarketDataGateway>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            gateway,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Ops HTTP server.
pub struct OpsServer {
    port: u16,
    state: Arc<OpsServerState>,
    cancel: CancellationToken,
}

impl OpsServer {
    /// Create a new ops server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<OpsServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the ops server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `OpsServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), OpsServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OpsServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Ops server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| OpsServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Ops server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<OpsServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        GatewayStatus::Healthy | GatewayStatus::Degraded => StatusCode::OK,
        GatewayStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<OpsServerState>>) -> impl IntoResponse {
    let stream_connected = state.gateway.stream_stats().state == ConnectionState::Connected;
    let primary_up = state.gateway.get_health().status != ProviderStatus::Down;

    if stream_connected || primary_up {
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

fn build_health_response(state: &OpsServerState) -> OpsHealthResponse {
    let primary = state.gateway.get_health();
    let secondary = state.gateway.get_secondary_health();
    let stream = state.gateway.stream_stats();

    let status = determine_status(&primary, stream.state);

    OpsHealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        primary,
        secondary,
        stream,
        gaps: state.gateway.get_gap_stats(),
        recovery: state.gateway.recovery_stats(),
        breaker: state.gateway.breaker_stats(),
    }
}

fn determine_status(primary: &HealthStatus, stream: ConnectionState) -> GatewayStatus {
    let stream_connected = stream == ConnectionState::Connected;

    match primary.status {
        ProviderStatus::Healthy if stream_connected => GatewayStatus::Healthy,
        ProviderStatus::Down if !stream_connected => GatewayStatus::Unhealthy,
        _ => GatewayStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Ops server errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsServerError {
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
