//! Redis adapter for the durable bus.
//!
//! Mirrors each envelope with a `PUBLISH` of its JSON form to the
//! configured channel, over a single multiplexed async connection that is
//! cheaply cloned per call.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::DurableBus;
use crate::domain::EventEnvelope;
use crate::error::GatewayError;

/// Redis-backed [`DurableBus`] using `PUBLISH` on a named channel.
#[derive(Clone)]
pub struct RedisBus {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

impl RedisBus {
    /// Connects to Redis at the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Bus`] if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let client =
            redis::Client::open(url).map_err(|e| GatewayError::Bus(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| GatewayError::Bus(e.to_string()))?;
        tracing::info!(url, "connected to durable bus");
        Ok(Self { connection })
    }
}

#[async_trait]
impl DurableBus for RedisBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), GatewayError> {
        let payload =
            serde_json::to_string(envelope).map_err(|e| GatewayError::Bus(e.to_string()))?;
        let mut connection = self.connection.clone();
        connection
            .publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| GatewayError::Bus(e.to_string()))?;
        tracing::debug!(topic, event_type = %envelope.kind(), "mirrored envelope to durable bus");
        Ok(())
    }
}
