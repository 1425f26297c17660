//! Connection registry and event fan-out.
//!
//! [`ConnectionManager`] owns the full set of live connections. All
//! registry mutation goes through its methods (single-owner discipline);
//! producers never touch the registry directly, only through the typed
//! broadcaster. Broadcasts serialize the envelope once, snapshot the
//! matching `OPEN` connections, and write to each independently; a
//! failure on one connection never aborts delivery to the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::connection::{ClientIdentity, ConnectionHandle, ConnectionState, OutboundFrame};
use crate::config::GatewayConfig;
use crate::domain::{ClientId, EventEnvelope, ProjectId, RunId, SubscriptionFilter, UserId};
use crate::error::GatewayError;

/// Interval at which `shutdown` polls for drained connections.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Subscriber counts per filter scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeCounts {
    /// Connections holding an `all` filter.
    pub all: usize,
    /// Connections holding at least one `run:<id>` filter.
    pub run: usize,
    /// Connections holding at least one `project:<id>` filter.
    pub project: usize,
    /// Connections holding at least one `user:<id>` filter.
    pub user: usize,
}

/// Read-only connection statistics for the observability surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Number of registered connections.
    pub total_connections: usize,
    /// Connections that supplied an identity at handshake.
    pub authenticated_connections: usize,
    /// Subscriber counts per filter scope.
    pub subscriptions: ScopeCounts,
    /// Frames dropped across all connections (full or closed queues).
    pub dropped_frames: u64,
}

/// Owns all live connections and routes envelopes to matching subsets.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ClientId, Arc<ConnectionHandle>>>,
    send_queue_capacity: usize,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    allow_unauthenticated: bool,
    unauthenticated_full_feed: bool,
}

impl ConnectionManager {
    /// Creates a manager from deployment configuration.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_queue_capacity: config.send_queue_capacity,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            allow_unauthenticated: config.allow_unauthenticated,
            unauthenticated_full_feed: config.unauthenticated_full_feed,
        }
    }

    /// Heartbeat ping interval for connection sessions.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Heartbeat timeout window for connection sessions.
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Returns `true` if an identity-less handshake may proceed.
    #[must_use]
    pub const fn permits(&self, identity: &ClientIdentity) -> bool {
        identity.is_authenticated() || self.allow_unauthenticated
    }

    /// Registers a new connection in `Open` state.
    ///
    /// Creates the outbound frame queue, applies the handshake filters and
    /// inserts the handle into the registry. The returned receiver feeds
    /// the connection's writer task.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthenticated`] if the identity-less
    /// handshake is rejected by deployment policy.
    pub async fn accept(
        &self,
        identity: ClientIdentity,
        initial_filters: Vec<SubscriptionFilter>,
    ) -> Result<(Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>), GatewayError> {
        if !self.permits(&identity) {
            return Err(GatewayError::Unauthenticated);
        }

        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let handle = Arc::new(ConnectionHandle::new(identity, tx));
        for filter in initial_filters {
            handle.add_filter(filter);
        }
        handle.set_state(ConnectionState::Open);

        let mut connections = self.connections.write().await;
        let _ = connections.insert(handle.id, Arc::clone(&handle));
        info!(client_id = %handle.id, total = connections.len(), "connection accepted");
        Ok((handle, rx))
    }

    /// Adds a filter to a connection's subscription set. Idempotent.
    ///
    /// Returns the connection's active filter count.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ClientNotFound`] for an unknown client ID.
    pub async fn subscribe(
        &self,
        client_id: ClientId,
        filter: SubscriptionFilter,
    ) -> Result<usize, GatewayError> {
        let handle = self.get(client_id).await?;
        if handle.add_filter(filter.clone()) {
            debug!(client_id = %client_id, %filter, "subscribed");
        }
        Ok(handle.filter_count())
    }

    /// Removes a filter from a connection's subscription set. Idempotent.
    ///
    /// Returns the connection's active filter count.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ClientNotFound`] for an unknown client ID.
    pub async fn unsubscribe(
        &self,
        client_id: ClientId,
        filter: &SubscriptionFilter,
    ) -> Result<usize, GatewayError> {
        let handle = self.get(client_id).await?;
        if handle.remove_filter(filter) {
            debug!(client_id = %client_id, %filter, "unsubscribed");
        }
        Ok(handle.filter_count())
    }

    /// Broadcasts a global envelope to every matching connection.
    pub async fn broadcast_to_all(&self, envelope: &EventEnvelope) -> usize {
        self.deliver(envelope, "all").await
    }

    /// Broadcasts an envelope routed to a run.
    pub async fn broadcast_to_run(&self, run_id: &RunId, envelope: &EventEnvelope) -> usize {
        debug!(%run_id, event_type = %envelope.kind(), "broadcast to run");
        self.deliver(envelope, "run").await
    }

    /// Broadcasts an envelope routed to a project.
    pub async fn broadcast_to_project(
        &self,
        project_id: &ProjectId,
        envelope: &EventEnvelope,
    ) -> usize {
        debug!(%project_id, event_type = %envelope.kind(), "broadcast to project");
        self.deliver(envelope, "project").await
    }

    /// Broadcasts an envelope routed to a user.
    pub async fn broadcast_to_user(&self, user_id: &UserId, envelope: &EventEnvelope) -> usize {
        debug!(%user_id, event_type = %envelope.kind(), "broadcast to user");
        self.deliver(envelope, "user").await
    }

    /// Serializes once and writes to every matching `Open` connection.
    ///
    /// Matching consults the envelope's routing fields against each
    /// connection's full filter set, so an envelope carrying several
    /// routing identifiers is delivered once per connection no matter how
    /// many of its filters match.
    async fn deliver(&self, envelope: &EventEnvelope, scope: &'static str) -> usize {
        let json = match serde_json::to_string(envelope) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(event_type = %envelope.kind(), error = %e, "failed to serialize envelope");
                return 0;
            }
        };

        let recipients: Vec<Arc<ConnectionHandle>> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| c.is_open() && c.matches(envelope, self.unauthenticated_full_feed))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for connection in &recipients {
            if connection.send(OutboundFrame::Text(Arc::clone(&json))) {
                delivered += 1;
            } else {
                warn!(client_id = %connection.id, scope, "frame dropped for slow or dead connection");
            }
        }
        debug!(
            event_type = %envelope.kind(),
            scope,
            matched = recipients.len(),
            delivered,
            "broadcast complete"
        );
        delivered
    }

    /// Returns read-only connection statistics. No side effects.
    pub async fn stats(&self) -> GatewayStats {
        let connections = self.connections.read().await;
        let mut stats = GatewayStats {
            total_connections: connections.len(),
            authenticated_connections: 0,
            subscriptions: ScopeCounts::default(),
            dropped_frames: 0,
        };
        for connection in connections.values() {
            if connection.identity.is_authenticated() {
                stats.authenticated_connections += 1;
            }
            stats.dropped_frames += connection.drop_count();
            let filters = connection.filters();
            if filters.iter().any(|f| matches!(f, SubscriptionFilter::All)) {
                stats.subscriptions.all += 1;
            }
            if filters.iter().any(|f| matches!(f, SubscriptionFilter::Run(_))) {
                stats.subscriptions.run += 1;
            }
            if filters
                .iter()
                .any(|f| matches!(f, SubscriptionFilter::Project(_)))
            {
                stats.subscriptions.project += 1;
            }
            if filters.iter().any(|f| matches!(f, SubscriptionFilter::User(_))) {
                stats.subscriptions.user += 1;
            }
        }
        stats
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Deregisters a connection after its session ended normally.
    ///
    /// Returns `true` if the connection was registered.
    pub async fn remove(&self, client_id: ClientId) -> bool {
        let removed = self.connections.write().await.remove(&client_id);
        if let Some(handle) = removed {
            let _ = handle.set_state(ConnectionState::Closing);
            let _ = handle.set_state(ConnectionState::Closed);
            info!(client_id = %client_id, "connection removed");
            true
        } else {
            false
        }
    }

    /// Forces a connection to `Closed` and removes it from the registry.
    ///
    /// Used for heartbeat timeouts and unreported transport failures: a
    /// close frame is enqueued best-effort, then the record is dropped so
    /// subsequent broadcasts never attempt a write to it.
    pub async fn force_close(&self, client_id: ClientId) -> bool {
        let removed = self.connections.write().await.remove(&client_id);
        if let Some(handle) = removed {
            let _ = handle.send(OutboundFrame::Close);
            let _ = handle.set_state(ConnectionState::Closing);
            let _ = handle.set_state(ConnectionState::Closed);
            warn!(client_id = %client_id, "connection force-closed");
            true
        } else {
            false
        }
    }

    /// Gracefully shuts down every connection.
    ///
    /// Transitions all connections to `Closing`, enqueues a close frame
    /// for each, waits up to `drain_timeout` for sessions to deregister
    /// themselves, then forces `Closed` on any stragglers.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let snapshot: Vec<Arc<ConnectionHandle>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };
        info!(connections = snapshot.len(), "shutting down connection manager");
        for handle in &snapshot {
            let _ = handle.set_state(ConnectionState::Closing);
            let _ = handle.send(OutboundFrame::Close);
        }

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.connections.read().await.is_empty() {
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let mut connections = self.connections.write().await;
        if !connections.is_empty() {
            warn!(stragglers = connections.len(), "drain timeout expired, forcing close");
            for handle in connections.values() {
                let _ = handle.set_state(ConnectionState::Closed);
            }
            connections.clear();
        }
        info!("connection manager shut down");
    }

    async fn get(&self, client_id: ClientId) -> Result<Arc<ConnectionHandle>, GatewayError> {
        self.connections
            .read()
            .await
            .get(&client_id)
            .cloned()
            .ok_or(GatewayError::ClientNotFound(*client_id.as_uuid()))
    }
}
