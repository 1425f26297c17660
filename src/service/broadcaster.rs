//! Typed publish surface for event producers.
//!
//! [`EventBroadcaster`] is the only interface the rest of the application
//! uses to reach this subsystem: one method per event type, each of which
//! builds the envelope, validates it, fans it out to matching connections
//! and mirrors it to the durable bus. Producers never touch the
//! connection registry directly.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::DurableBus;
use crate::domain::event::{
    ApprovalDeniedPayload, ApprovalGrantedPayload, ApprovalRequestedPayload,
    ArtifactCreatedPayload, ArtifactUpdatedPayload, RunCompletedPayload, RunCreatedPayload,
    RunFailedPayload, RunStartedPayload, StageCompletedPayload, StageFailedPayload,
    StageProgressPayload, StageStartedPayload,
};
use crate::domain::{EventBody, EventEnvelope};
use crate::error::GatewayError;
use crate::ws::ConnectionManager;

/// Validated publish API over the connection manager and the durable bus.
///
/// Every publish method follows the same pattern: construct the envelope
/// (stamping the timestamp and routing fields from the payload), validate,
/// fan out through the manager's `broadcast_to_*` call selected by the
/// most specific routing field present, and mirror to the durable bus on
/// a detached task. The two sinks are independent best-effort deliveries:
/// a bus outage never blocks or fails the real-time path, and vice versa.
#[derive(Clone)]
pub struct EventBroadcaster {
    manager: Arc<ConnectionManager>,
    bus: Arc<dyn DurableBus>,
    bus_topic: String,
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("bus_topic", &self.bus_topic)
            .finish_non_exhaustive()
    }
}

impl EventBroadcaster {
    /// Creates a broadcaster over the given manager and bus.
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager>,
        bus: Arc<dyn DurableBus>,
        bus_topic: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            bus,
            bus_topic: bus_topic.into(),
        }
    }

    /// Validates and publishes one event body to both sinks.
    ///
    /// Returns the stamped envelope on acceptance. On validation failure
    /// the call fails synchronously and neither sink sees the event.
    async fn publish(&self, body: EventBody) -> Result<EventEnvelope, GatewayError> {
        let envelope = EventEnvelope::new(body);
        envelope.validate()?;

        let delivered = if let Some(run_id) = &envelope.run_id {
            self.manager.broadcast_to_run(run_id, &envelope).await
        } else if let Some(project_id) = &envelope.project_id {
            self.manager.broadcast_to_project(project_id, &envelope).await
        } else if let Some(user_id) = &envelope.user_id {
            self.manager.broadcast_to_user(user_id, &envelope).await
        } else {
            self.manager.broadcast_to_all(&envelope).await
        };
        debug!(event_type = %envelope.kind(), delivered, "event published");

        let bus = Arc::clone(&self.bus);
        let topic = self.bus_topic.clone();
        let mirror = envelope.clone();
        drop(tokio::spawn(async move {
            if let Err(e) = bus.publish(&topic, &mirror).await {
                warn!(event_type = %mirror.kind(), error = %e, "durable bus mirror failed");
            }
        }));

        Ok(envelope)
    }

    /// Publishes `run.created`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_run_created(
        &self,
        payload: RunCreatedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::RunCreated(payload)).await
    }

    /// Publishes `run.started`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_run_started(
        &self,
        payload: RunStartedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::RunStarted(payload)).await
    }

    /// Publishes `run.completed`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_run_completed(
        &self,
        payload: RunCompletedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::RunCompleted(payload)).await
    }

    /// Publishes `run.failed`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_run_failed(
        &self,
        payload: RunFailedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::RunFailed(payload)).await
    }

    /// Publishes `stage.started`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_stage_started(
        &self,
        payload: StageStartedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::StageStarted(payload)).await
    }

    /// Publishes `stage.progress`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_stage_progress(
        &self,
        payload: StageProgressPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::StageProgress(payload)).await
    }

    /// Publishes `stage.completed`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_stage_completed(
        &self,
        payload: StageCompletedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::StageCompleted(payload)).await
    }

    /// Publishes `stage.failed`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_stage_failed(
        &self,
        payload: StageFailedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::StageFailed(payload)).await
    }

    /// Publishes `artifact.created`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_artifact_created(
        &self,
        payload: ArtifactCreatedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::ArtifactCreated(payload)).await
    }

    /// Publishes `artifact.updated`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_artifact_updated(
        &self,
        payload: ArtifactUpdatedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::ArtifactUpdated(payload)).await
    }

    /// Publishes `approval.requested`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_approval_requested(
        &self,
        payload: ApprovalRequestedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::ApprovalRequested(payload)).await
    }

    /// Publishes `approval.granted`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_approval_granted(
        &self,
        payload: ApprovalGrantedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::ApprovalGranted(payload)).await
    }

    /// Publishes `approval.denied`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the payload fails
    /// validation; no partial broadcast occurs.
    pub async fn publish_approval_denied(
        &self,
        payload: ApprovalDeniedPayload,
    ) -> Result<EventEnvelope, GatewayError> {
        self.publish(EventBody::ApprovalDenied(payload)).await
    }
}
