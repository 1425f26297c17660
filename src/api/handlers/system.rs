//! System endpoints: health check and connection statistics.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum::extract::State;
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status string.
    status: String,
    /// Current server time, RFC 3339.
    timestamp: String,
    /// Crate version.
    version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Connection and subscriber counts.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Registered connections.
    total_connections: usize,
    /// Connections that supplied an identity at handshake.
    authenticated_connections: usize,
    /// Connections holding an `all` filter.
    subscribers_all: usize,
    /// Connections holding at least one run filter.
    subscribers_run: usize,
    /// Connections holding at least one project filter.
    subscribers_project: usize,
    /// Connections holding at least one user filter.
    subscribers_user: usize,
    /// Frames dropped across all connections.
    dropped_frames: u64,
}

/// `GET /stats` — Connection and subscriber counts.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "System",
    summary = "Connection statistics",
    description = "Read-only counts of connections and per-scope subscribers \
                   for health and monitoring consumption.",
    responses(
        (status = 200, description = "Current statistics", body = StatsResponse),
    )
)]
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.manager.stats().await;
    (
        StatusCode::OK,
        Json(StatsResponse {
            total_connections: stats.total_connections,
            authenticated_connections: stats.authenticated_connections,
            subscribers_all: stats.subscriptions.all,
            subscribers_run: stats.subscriptions.run,
            subscribers_project: stats.subscriptions.project,
            subscribers_user: stats.subscriptions.user,
            dropped_frames: stats.dropped_frames,
        }),
    )
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
}
