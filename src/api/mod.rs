//! REST API layer: observability handlers and router composition.
//!
//! The REST surface is deliberately small: health, stats, and the
//! OpenAPI document. The event stream itself lives on `/ws`.

pub mod handlers;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the observability surface.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(handlers::system::health_handler, handlers::system::stats_handler),
    components(schemas(handlers::system::HealthResponse, handlers::system::StatsResponse)),
    tags((name = "System", description = "Health and monitoring"))
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
}
