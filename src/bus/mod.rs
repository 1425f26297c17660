//! Durable-bus boundary: best-effort mirror of every published envelope.
//!
//! The general-purpose publish/subscribe bus that events are mirrored into
//! (for audit/history) is an external collaborator. This module defines
//! only its contract, the [`DurableBus`] port, plus a Redis-backed
//! adapter and a no-op adapter for deployments that disable the mirror.

pub mod redis;

use async_trait::async_trait;

use crate::domain::EventEnvelope;
use crate::error::GatewayError;

pub use redis::RedisBus;

/// Port for mirroring validated envelopes to the external durable bus.
///
/// Implementations deliver best-effort: the real-time path never waits on
/// them, and a failure here must never fail a publish call. The bus's own
/// delivery guarantees are out of scope.
#[async_trait]
pub trait DurableBus: Send + Sync {
    /// Publishes one envelope, unmodified, to the named topic.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Bus`] if the bus rejects the publish; the
    /// caller logs and moves on.
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), GatewayError>;
}

/// Bus adapter for deployments without a durable bus.
///
/// Accepts every envelope and drops it, logging at trace level only.
#[derive(Debug, Clone, Default)]
pub struct NoopBus;

#[async_trait]
impl DurableBus for NoopBus {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<(), GatewayError> {
        tracing::trace!(topic, event_type = %envelope.kind(), "durable bus disabled, dropping mirror");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::event::{EventBody, StageProgressPayload};
    use crate::domain::RunId;

    // Compile-time check that the port stays object-safe.
    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn DurableBus) {}

    #[tokio::test]
    async fn noop_bus_accepts_everything() {
        let bus = NoopBus;
        let envelope = EventEnvelope::new(EventBody::StageProgress(StageProgressPayload {
            run_id: RunId::new("r1"),
            stage: "export".to_string(),
            percent: 10,
            detail: None,
        }));
        let result = bus.publish("platform.events", &envelope).await;
        assert!(result.is_ok());
    }
}
