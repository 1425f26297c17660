//! Control frames: the reserved `control.*` type namespace.
//!
//! Control frames share the `type`-tagged JSON shape with event envelopes
//! but live in a namespace the event schema can never produce, so the two
//! kinds of traffic are distinguished by the discriminator alone.
//! Liveness uses WebSocket protocol Ping/Pong frames, not control frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ClientId;

/// Frames exchanged outside the event stream.
///
/// `Connected`, `Ack` and `Error` flow server → client; `Subscribe` and
/// `Unsubscribe` flow client → server. Filters travel in their canonical
/// string form (`all`, `run:<id>`, `project:<id>`, `user:<id>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    /// Server hello carrying the generated client ID.
    #[serde(rename = "control.connected")]
    Connected {
        /// The connection's server-assigned ID.
        client_id: ClientId,
        /// Server time at accept.
        timestamp: DateTime<Utc>,
    },

    /// Client request to add subscription filters.
    #[serde(rename = "control.subscribe")]
    Subscribe {
        /// Filters in canonical string form.
        filters: Vec<String>,
    },

    /// Client request to remove subscription filters.
    #[serde(rename = "control.unsubscribe")]
    Unsubscribe {
        /// Filters in canonical string form.
        filters: Vec<String>,
    },

    /// Server acknowledgement of a subscribe/unsubscribe request.
    #[serde(rename = "control.ack")]
    Ack {
        /// The acknowledged operation (`subscribe` or `unsubscribe`).
        op: String,
        /// Filters accepted by this request.
        accepted: Vec<String>,
        /// Active filter count after the operation.
        active: usize,
    },

    /// Server-side rejection of a client frame.
    #[serde(rename = "control.error")]
    Error {
        /// Numeric error code (same ranges as the HTTP error body).
        code: u32,
        /// Human-readable message.
        message: String,
    },
}

impl ControlFrame {
    /// Serializes the frame to its JSON wire form.
    ///
    /// Control frames contain nothing that can fail to serialize; on the
    /// impossible failure an empty string is returned, which the peer
    /// drops as malformed.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_wire_shape() {
        let frame = ControlFrame::Connected {
            client_id: ClientId::new(),
            timestamp: Utc::now(),
        };
        let Ok(json) = serde_json::to_value(&frame) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "control.connected");
        assert!(json["client_id"].is_string());
    }

    #[test]
    fn subscribe_frame_round_trip() {
        let frame = ControlFrame::Subscribe {
            filters: vec!["run:r1".to_string(), "all".to_string()],
        };
        let Ok(back) = serde_json::from_str::<ControlFrame>(&frame.to_json()) else {
            panic!("round trip failed");
        };
        assert_eq!(back, frame);
    }

    #[test]
    fn unknown_control_type_rejected() {
        let raw = r#"{"type":"control.reboot"}"#;
        assert!(serde_json::from_str::<ControlFrame>(raw).is_err());
    }

    #[test]
    fn event_type_is_not_a_control_frame() {
        let raw = r#"{"type":"run.created","payload":{}}"#;
        assert!(serde_json::from_str::<ControlFrame>(raw).is_err());
    }

    #[test]
    fn ack_reports_counts() {
        let frame = ControlFrame::Ack {
            op: "subscribe".to_string(),
            accepted: vec!["run:r1".to_string()],
            active: 2,
        };
        let Ok(json) = serde_json::to_value(&frame) else {
            panic!("serialization failed");
        };
        assert_eq!(json["type"], "control.ack");
        assert_eq!(json["active"], 2);
    }
}
