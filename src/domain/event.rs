//! Typed event schema: envelope, payloads, categories, validation gate.
//!
//! Every event that crosses the wire is an [`EventEnvelope`]: a closed,
//! discriminated set of event types ([`EventBody`]) plus broadcaster-stamped
//! metadata. [`EventEnvelope::parse`] is the single validation gate used
//! server-side (before broadcast) and client-side (before dispatch), so
//! malformed or spoofed frames never reach business handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ProjectId, RunId, UserId};
use crate::error::GatewayError;

/// Coarse grouping of event types for bulk subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Run creation and terminal transitions.
    RunLifecycle,
    /// Per-stage execution progress within a run.
    StageLifecycle,
    /// Artifact production and revision.
    Artifact,
    /// Approval workflow decisions.
    Governance,
}

impl EventCategory {
    /// Returns the category as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RunLifecycle => "run_lifecycle",
            Self::StageLifecycle => "stage_lifecycle",
            Self::Artifact => "artifact",
            Self::Governance => "governance",
        }
    }
}

impl std::str::FromStr for EventCategory {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_lifecycle" => Ok(Self::RunLifecycle),
            "stage_lifecycle" => Ok(Self::StageLifecycle),
            "artifact" => Ok(Self::Artifact),
            "governance" => Ok(Self::Governance),
            other => Err(GatewayError::UnknownEventType(other.to_string())),
        }
    }
}

/// Field-less discriminator for the closed set of event types.
///
/// Used as the handler-table key on the client side and for logging on the
/// server side. The dotted wire names mirror the `type` tag of
/// [`EventBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `run.created`
    RunCreated,
    /// `run.started`
    RunStarted,
    /// `run.completed`
    RunCompleted,
    /// `run.failed`
    RunFailed,
    /// `stage.started`
    StageStarted,
    /// `stage.progress`
    StageProgress,
    /// `stage.completed`
    StageCompleted,
    /// `stage.failed`
    StageFailed,
    /// `artifact.created`
    ArtifactCreated,
    /// `artifact.updated`
    ArtifactUpdated,
    /// `approval.requested`
    ApprovalRequested,
    /// `approval.granted`
    ApprovalGranted,
    /// `approval.denied`
    ApprovalDenied,
}

impl EventKind {
    /// Returns the dotted wire name of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RunCreated => "run.created",
            Self::RunStarted => "run.started",
            Self::RunCompleted => "run.completed",
            Self::RunFailed => "run.failed",
            Self::StageStarted => "stage.started",
            Self::StageProgress => "stage.progress",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::ArtifactCreated => "artifact.created",
            Self::ArtifactUpdated => "artifact.updated",
            Self::ApprovalRequested => "approval.requested",
            Self::ApprovalGranted => "approval.granted",
            Self::ApprovalDenied => "approval.denied",
        }
    }

    /// Returns the category this event type belongs to.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::RunCreated | Self::RunStarted | Self::RunCompleted | Self::RunFailed => {
                EventCategory::RunLifecycle
            }
            Self::StageStarted
            | Self::StageProgress
            | Self::StageCompleted
            | Self::StageFailed => EventCategory::StageLifecycle,
            Self::ArtifactCreated | Self::ArtifactUpdated => EventCategory::Artifact,
            Self::ApprovalRequested | Self::ApprovalGranted | Self::ApprovalDenied => {
                EventCategory::Governance
            }
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run.created" => Ok(Self::RunCreated),
            "run.started" => Ok(Self::RunStarted),
            "run.completed" => Ok(Self::RunCompleted),
            "run.failed" => Ok(Self::RunFailed),
            "stage.started" => Ok(Self::StageStarted),
            "stage.progress" => Ok(Self::StageProgress),
            "stage.completed" => Ok(Self::StageCompleted),
            "stage.failed" => Ok(Self::StageFailed),
            "artifact.created" => Ok(Self::ArtifactCreated),
            "artifact.updated" => Ok(Self::ArtifactUpdated),
            "approval.requested" => Ok(Self::ApprovalRequested),
            "approval.granted" => Ok(Self::ApprovalGranted),
            "approval.denied" => Ok(Self::ApprovalDenied),
            other => Err(GatewayError::UnknownEventType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for `run.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCreatedPayload {
    /// Identifier of the new run.
    pub run_id: RunId,
    /// Project the run belongs to.
    pub project_id: ProjectId,
    /// User who requested the run.
    pub requested_by: UserId,
    /// Human-readable run title.
    pub title: String,
}

/// Payload for `run.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStartedPayload {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Project the run belongs to.
    pub project_id: ProjectId,
    /// Number of stages the run will execute.
    pub stage_count: u32,
}

/// Payload for `run.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Project the run belongs to.
    pub project_id: ProjectId,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Payload for `run.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailedPayload {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Project the run belongs to.
    pub project_id: ProjectId,
    /// Failure description.
    pub reason: String,
}

/// Payload for `stage.started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStartedPayload {
    /// Run the stage belongs to.
    pub run_id: RunId,
    /// Stage name (e.g. `"phi_scan"`).
    pub stage: String,
    /// Zero-based position of the stage in the run.
    pub index: u32,
}

/// Payload for `stage.progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgressPayload {
    /// Run the stage belongs to.
    pub run_id: RunId,
    /// Stage name.
    pub stage: String,
    /// Completion percentage, `0..=100`.
    pub percent: u8,
    /// Optional human-readable progress detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Payload for `stage.completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCompletedPayload {
    /// Run the stage belongs to.
    pub run_id: RunId,
    /// Stage name.
    pub stage: String,
    /// Wall-clock duration of the stage in milliseconds.
    pub duration_ms: u64,
}

/// Payload for `stage.failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailedPayload {
    /// Run the stage belongs to.
    pub run_id: RunId,
    /// Stage name.
    pub stage: String,
    /// Failure description.
    pub reason: String,
}

/// Payload for `artifact.created`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactCreatedPayload {
    /// Run that produced the artifact.
    pub run_id: RunId,
    /// Project the artifact belongs to.
    pub project_id: ProjectId,
    /// Identifier of the artifact.
    pub artifact_id: String,
    /// Artifact kind string (e.g. `"manuscript_draft"`).
    pub kind: String,
    /// Size in bytes.
    pub size_bytes: u64,
}

/// Payload for `artifact.updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactUpdatedPayload {
    /// Run that produced the revision.
    pub run_id: RunId,
    /// Project the artifact belongs to.
    pub project_id: ProjectId,
    /// Identifier of the artifact.
    pub artifact_id: String,
    /// Monotonically increasing revision number.
    pub version: u32,
}

/// Payload for `approval.requested`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequestedPayload {
    /// Identifier of the approval request.
    pub approval_id: String,
    /// Run awaiting the decision.
    pub run_id: RunId,
    /// User asked to decide.
    pub user_id: UserId,
}

/// Payload for `approval.granted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGrantedPayload {
    /// Identifier of the approval request.
    pub approval_id: String,
    /// Run the decision unblocks.
    pub run_id: RunId,
    /// User who granted the approval.
    pub user_id: UserId,
    /// Optional reviewer comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Payload for `approval.denied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDeniedPayload {
    /// Identifier of the approval request.
    pub approval_id: String,
    /// Run the decision blocks.
    pub run_id: RunId,
    /// User who denied the approval.
    pub user_id: UserId,
    /// Reason for the denial.
    pub reason: String,
}

/// Discriminated event body: `type` tag plus `payload` content.
///
/// The set is closed; deserializing an unknown `type` fails, which is what
/// keeps control frames (reserved `control.*` namespace) and spoofed types
/// out of the event path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    /// A run was created and queued.
    #[serde(rename = "run.created")]
    RunCreated(RunCreatedPayload),
    /// A run began executing.
    #[serde(rename = "run.started")]
    RunStarted(RunStartedPayload),
    /// A run finished successfully.
    #[serde(rename = "run.completed")]
    RunCompleted(RunCompletedPayload),
    /// A run terminated with an error.
    #[serde(rename = "run.failed")]
    RunFailed(RunFailedPayload),
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted(StageStartedPayload),
    /// A stage reported progress.
    #[serde(rename = "stage.progress")]
    StageProgress(StageProgressPayload),
    /// A stage finished successfully.
    #[serde(rename = "stage.completed")]
    StageCompleted(StageCompletedPayload),
    /// A stage terminated with an error.
    #[serde(rename = "stage.failed")]
    StageFailed(StageFailedPayload),
    /// An artifact was produced.
    #[serde(rename = "artifact.created")]
    ArtifactCreated(ArtifactCreatedPayload),
    /// An artifact gained a new revision.
    #[serde(rename = "artifact.updated")]
    ArtifactUpdated(ArtifactUpdatedPayload),
    /// An approval decision was requested.
    #[serde(rename = "approval.requested")]
    ApprovalRequested(ApprovalRequestedPayload),
    /// An approval was granted.
    #[serde(rename = "approval.granted")]
    ApprovalGranted(ApprovalGrantedPayload),
    /// An approval was denied.
    #[serde(rename = "approval.denied")]
    ApprovalDenied(ApprovalDeniedPayload),
}

impl EventBody {
    /// Returns the field-less discriminator for this body.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::RunCreated(_) => EventKind::RunCreated,
            Self::RunStarted(_) => EventKind::RunStarted,
            Self::RunCompleted(_) => EventKind::RunCompleted,
            Self::RunFailed(_) => EventKind::RunFailed,
            Self::StageStarted(_) => EventKind::StageStarted,
            Self::StageProgress(_) => EventKind::StageProgress,
            Self::StageCompleted(_) => EventKind::StageCompleted,
            Self::StageFailed(_) => EventKind::StageFailed,
            Self::ArtifactCreated(_) => EventKind::ArtifactCreated,
            Self::ArtifactUpdated(_) => EventKind::ArtifactUpdated,
            Self::ApprovalRequested(_) => EventKind::ApprovalRequested,
            Self::ApprovalGranted(_) => EventKind::ApprovalGranted,
            Self::ApprovalDenied(_) => EventKind::ApprovalDenied,
        }
    }

    /// Returns the run identifier carried by the payload, if any.
    #[must_use]
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::RunCreated(p) => Some(&p.run_id),
            Self::RunStarted(p) => Some(&p.run_id),
            Self::RunCompleted(p) => Some(&p.run_id),
            Self::RunFailed(p) => Some(&p.run_id),
            Self::StageStarted(p) => Some(&p.run_id),
            Self::StageProgress(p) => Some(&p.run_id),
            Self::StageCompleted(p) => Some(&p.run_id),
            Self::StageFailed(p) => Some(&p.run_id),
            Self::ArtifactCreated(p) => Some(&p.run_id),
            Self::ArtifactUpdated(p) => Some(&p.run_id),
            Self::ApprovalRequested(p) => Some(&p.run_id),
            Self::ApprovalGranted(p) => Some(&p.run_id),
            Self::ApprovalDenied(p) => Some(&p.run_id),
        }
    }

    /// Returns the project identifier carried by the payload, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<&ProjectId> {
        match self {
            Self::RunCreated(p) => Some(&p.project_id),
            Self::RunStarted(p) => Some(&p.project_id),
            Self::RunCompleted(p) => Some(&p.project_id),
            Self::RunFailed(p) => Some(&p.project_id),
            Self::ArtifactCreated(p) => Some(&p.project_id),
            Self::ArtifactUpdated(p) => Some(&p.project_id),
            Self::StageStarted(_)
            | Self::StageProgress(_)
            | Self::StageCompleted(_)
            | Self::StageFailed(_)
            | Self::ApprovalRequested(_)
            | Self::ApprovalGranted(_)
            | Self::ApprovalDenied(_) => None,
        }
    }

    /// Returns the user identifier carried by the payload, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::RunCreated(p) => Some(&p.requested_by),
            Self::ApprovalRequested(p) => Some(&p.user_id),
            Self::ApprovalGranted(p) => Some(&p.user_id),
            Self::ApprovalDenied(p) => Some(&p.user_id),
            Self::RunStarted(_)
            | Self::RunCompleted(_)
            | Self::RunFailed(_)
            | Self::StageStarted(_)
            | Self::StageProgress(_)
            | Self::StageCompleted(_)
            | Self::StageFailed(_)
            | Self::ArtifactCreated(_)
            | Self::ArtifactUpdated(_) => None,
        }
    }

    /// Semantic validation beyond the structural shape.
    ///
    /// Serde already guarantees the payload struct matches the `type` tag;
    /// this checks the field-level constraints a well-formed producer must
    /// honor. The match is exhaustive so a new event type cannot be added
    /// without deciding its rules.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] naming the offending field.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let fail = |field: &'static str, reason: &str| {
            Err(GatewayError::InvalidEvent {
                event_type: self.kind().as_str(),
                field,
                reason: reason.to_string(),
            })
        };

        if self.run_id().is_some_and(RunId::is_empty) {
            return fail("run_id", "must not be empty");
        }
        if self.project_id().is_some_and(ProjectId::is_empty) {
            return fail("project_id", "must not be empty");
        }
        if self.user_id().is_some_and(UserId::is_empty) {
            return fail("user_id", "must not be empty");
        }

        match self {
            Self::RunCreated(p) => {
                if p.title.is_empty() {
                    return fail("title", "must not be empty");
                }
            }
            Self::RunFailed(p) => {
                if p.reason.is_empty() {
                    return fail("reason", "must not be empty");
                }
            }
            Self::StageStarted(p) => {
                if p.stage.is_empty() {
                    return fail("stage", "must not be empty");
                }
            }
            Self::StageProgress(p) => {
                if p.stage.is_empty() {
                    return fail("stage", "must not be empty");
                }
                if p.percent > 100 {
                    return fail("percent", "must be between 0 and 100");
                }
            }
            Self::StageCompleted(p) => {
                if p.stage.is_empty() {
                    return fail("stage", "must not be empty");
                }
            }
            Self::StageFailed(p) => {
                if p.stage.is_empty() {
                    return fail("stage", "must not be empty");
                }
                if p.reason.is_empty() {
                    return fail("reason", "must not be empty");
                }
            }
            Self::ArtifactCreated(p) => {
                if p.artifact_id.is_empty() {
                    return fail("artifact_id", "must not be empty");
                }
                if p.kind.is_empty() {
                    return fail("kind", "must not be empty");
                }
            }
            Self::ArtifactUpdated(p) => {
                if p.artifact_id.is_empty() {
                    return fail("artifact_id", "must not be empty");
                }
            }
            Self::ApprovalRequested(p) => {
                if p.approval_id.is_empty() {
                    return fail("approval_id", "must not be empty");
                }
            }
            Self::ApprovalGranted(p) => {
                if p.approval_id.is_empty() {
                    return fail("approval_id", "must not be empty");
                }
            }
            Self::ApprovalDenied(p) => {
                if p.approval_id.is_empty() {
                    return fail("approval_id", "must not be empty");
                }
                if p.reason.is_empty() {
                    return fail("reason", "must not be empty");
                }
            }
            Self::RunStarted(_) | Self::RunCompleted(_) => {}
        }
        Ok(())
    }
}

/// The validated, timestamped wrapper that is actually transmitted.
///
/// Created once per publish call. The timestamp and routing fields are
/// assigned by the constructor from the payload; producers never set them
/// directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Discriminated event body (`type` + `payload` on the wire).
    #[serde(flatten)]
    pub body: EventBody,
    /// Creation time, stamped at construction.
    pub timestamp: DateTime<Utc>,
    /// Run routing key, present when the payload names a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Project routing key, present when the payload names a project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    /// User routing key, present when the payload names a user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl EventEnvelope {
    /// Builds an envelope from a body, stamping the timestamp and copying
    /// the routing fields out of the payload.
    #[must_use]
    pub fn new(body: EventBody) -> Self {
        let run_id = body.run_id().cloned();
        let project_id = body.project_id().cloned();
        let user_id = body.user_id().cloned();
        Self {
            body,
            timestamp: Utc::now(),
            run_id,
            project_id,
            user_id,
        }
    }

    /// Returns the discriminator of the wrapped body.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Returns the category of the wrapped body.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.body.kind().category()
    }

    /// Returns `true` if the envelope carries no routing field (global).
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.run_id.is_none() && self.project_id.is_none() && self.user_id.is_none()
    }

    /// Runs semantic validation on the wrapped body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] naming the offending field.
    pub fn validate(&self) -> Result<(), GatewayError> {
        self.body.validate()
    }

    /// Parses and validates a raw text frame.
    ///
    /// This is the validation gate: structural validation via serde
    /// (unknown `type` values fail here), then semantic validation via
    /// [`EventBody::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MalformedEvent`] on structural failure and
    /// [`GatewayError::InvalidEvent`] on semantic failure.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let envelope: Self = serde_json::from_str(text)
            .map_err(|e| GatewayError::MalformedEvent(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}
