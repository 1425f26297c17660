//! pulse-gateway server entry point.
//!
//! Starts the Axum HTTP server with the `/ws` event stream and the
//! observability endpoints, and drains connections gracefully on SIGINT.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pulse_gateway::api;
use pulse_gateway::app_state::AppState;
use pulse_gateway::bus::{DurableBus, NoopBus, RedisBus};
use pulse_gateway::config::GatewayConfig;
use pulse_gateway::service::EventBroadcaster;
use pulse_gateway::ws::ConnectionManager;
use pulse_gateway::ws::handler::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting pulse-gateway");

    // Connection manager and durable-bus mirror
    let manager = Arc::new(ConnectionManager::new(&config));
    let bus: Arc<dyn DurableBus> = if config.bus_enabled {
        match RedisBus::connect(&config.bus_url).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                // The mirror is best-effort; never hold up the real-time path.
                tracing::warn!(error = %e, "durable bus unavailable, mirroring disabled");
                Arc::new(NoopBus)
            }
        }
    } else {
        Arc::new(NoopBus)
    };
    let broadcaster = Arc::new(EventBroadcaster::new(
        Arc::clone(&manager),
        bus,
        config.bus_topic.clone(),
    ));

    // Build application state
    let app_state = AppState {
        manager: Arc::clone(&manager),
        broadcaster,
    };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain live connections before exiting
    manager.shutdown(config.drain_timeout()).await;

    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
