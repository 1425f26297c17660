//! Axum WebSocket upgrade handler.
//!
//! Identity and initial filters arrive as query parameters on the upgrade
//! request; policy is enforced before the upgrade completes so a rejected
//! client gets a proper HTTP 403 instead of an immediate close.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::connection::ClientIdentity;
use super::session::run_session;
use crate::app_state::AppState;
use crate::domain::{ProjectId, RunId, SubscriptionFilter, UserId};
use crate::error::GatewayError;

/// Handshake query parameters for `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Verified user identity, if authenticated.
    pub user_id: Option<String>,
    /// Project context.
    pub project_id: Option<String>,
    /// Run context.
    pub run_id: Option<String>,
    /// Comma-separated initial filters, e.g. `run:r1,project:p2`.
    pub filters: Option<String>,
}

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthenticated`] (HTTP 403) when an
/// identity-less handshake is forbidden by policy, and
/// [`GatewayError::InvalidFilter`] (HTTP 400) for an unparseable filter.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, GatewayError> {
    let identity = ClientIdentity {
        user_id: query.user_id.map(UserId::new),
        project_id: query.project_id.map(ProjectId::new),
        run_id: query.run_id.map(RunId::new),
    };
    if !state.manager.permits(&identity) {
        return Err(GatewayError::Unauthenticated);
    }

    let filters = parse_filter_list(query.filters.as_deref())?;
    let manager = Arc::clone(&state.manager);
    Ok(ws.on_upgrade(move |socket| run_session(socket, manager, identity, filters)))
}

/// Parses a comma-separated filter list from the handshake.
fn parse_filter_list(raw: Option<&str>) -> Result<Vec<SubscriptionFilter>, GatewayError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_filter_list() {
        let Ok(filters) = parse_filter_list(None) else {
            panic!("none should parse");
        };
        assert!(filters.is_empty());
        let Ok(filters) = parse_filter_list(Some("")) else {
            panic!("empty should parse");
        };
        assert!(filters.is_empty());
    }

    #[test]
    fn parse_mixed_filter_list() {
        let Ok(filters) = parse_filter_list(Some("all, run:r1 ,project:p2")) else {
            panic!("list should parse");
        };
        assert_eq!(filters.len(), 3);
        assert_eq!(filters.first(), Some(&SubscriptionFilter::All));
        assert!(filters.contains(&SubscriptionFilter::Run(RunId::new("r1"))));
    }

    #[test]
    fn parse_rejects_bad_entry() {
        let result = parse_filter_list(Some("all,banana:7"));
        assert!(matches!(result, Err(GatewayError::InvalidFilter(_))));
    }
}
