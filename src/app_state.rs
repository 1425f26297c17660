//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::EventBroadcaster;
use crate::ws::ConnectionManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Connection registry and fan-out.
    pub manager: Arc<ConnectionManager>,
    /// Producer-facing publish surface.
    pub broadcaster: Arc<EventBroadcaster>,
}
