//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Publish-time
//! validation failures are surfaced synchronously to producers; connection-
//! level failures stay internal and reach only the logs. HTTP-facing
//! variants map to a specific status code and structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid event stage.progress: percent: must be between 0 and 100",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request            |
/// | 2000–2999 | Not Found       | 404 Not Found              |
/// | 3000–3999 | Server          | 500 Internal Server Error  |
/// | 4000–4999 | Policy          | 403 Forbidden              |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A typed publish call carried a payload violating a field constraint.
    #[error("invalid event {event_type}: {field}: {reason}")]
    InvalidEvent {
        /// Wire name of the offending event type.
        event_type: &'static str,
        /// Name of the offending payload field.
        field: &'static str,
        /// What the constraint expected.
        reason: String,
    },

    /// A raw frame failed structural validation (bad JSON or unknown shape).
    #[error("malformed event frame: {0}")]
    MalformedEvent(String),

    /// A `type` value outside the closed event set.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A subscription filter string that is not `all`, `run:<id>`,
    /// `project:<id>` or `user:<id>`.
    #[error("invalid subscription filter: {0}")]
    InvalidFilter(String),

    /// No live connection with the given client ID.
    #[error("client not found: {0}")]
    ClientNotFound(uuid::Uuid),

    /// Identity-less handshake rejected by deployment policy.
    #[error("unauthenticated connections are not allowed")]
    Unauthenticated,

    /// Per-connection socket failure; isolated, never surfaced to producers.
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable-bus mirror failure; logged, never surfaced to producers.
    #[error("durable bus error: {0}")]
    Bus(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidEvent { .. } => 1001,
            Self::MalformedEvent(_) => 1002,
            Self::UnknownEventType(_) => 1003,
            Self::InvalidFilter(_) => 1004,
            Self::ClientNotFound(_) => 2001,
            Self::Unauthenticated => 4001,
            Self::Bus(_) => 3001,
            Self::Transport(_) => 3002,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEvent { .. }
            | Self::MalformedEvent(_)
            | Self::UnknownEventType(_)
            | Self::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            Self::ClientNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::FORBIDDEN,
            Self::Bus(_) | Self::Transport(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
