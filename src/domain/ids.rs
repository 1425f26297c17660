//! Type-safe identifiers used for event routing and connection tracking.
//!
//! [`ClientId`] is a newtype wrapper around [`uuid::Uuid`] (v4) generated
//! server-side at accept time. [`RunId`], [`ProjectId`] and [`UserId`] wrap
//! opaque strings minted by the out-of-scope orchestration layer; the
//! gateway routes on them but never interprets them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a WebSocket connection.
///
/// Wraps a UUID v4. Generated once when the connection is accepted and
/// immutable thereafter. Used as the dictionary key in the connection
/// registry and echoed to the client in the `control.connected` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Creates a new random `ClientId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `ClientId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the identifier is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of an orchestration run.
    RunId
);

string_id!(
    /// Identifier of a project grouping runs.
    ProjectId
);

string_id!(
    /// Identifier of a platform user.
    UserId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn client_id_display_is_uuid_format() {
        let id = ClientId::new();
        let s = format!("{id}");
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn client_id_serde_round_trip() {
        let id = ClientId::new();
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        let Ok(back) = serde_json::from_str::<ClientId>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(id, back);
    }

    #[test]
    fn run_id_round_trips_as_plain_string() {
        let id = RunId::new("r1");
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "\"r1\"");
    }

    #[test]
    fn string_ids_compare_structurally() {
        assert_eq!(UserId::new("u1"), UserId::from("u1"));
        assert_ne!(ProjectId::new("p1"), ProjectId::new("p2"));
    }

    #[test]
    fn ids_work_as_map_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(RunId::new("r1"), 1);
        assert_eq!(map.get(&RunId::new("r1")), Some(&1));
    }

    #[test]
    fn empty_id_detected() {
        assert!(UserId::new("").is_empty());
        assert!(!UserId::new("u1").is_empty());
    }
}
