//! Subscription filters: predicates selecting recipient connections.
//!
//! A filter is a value with structural equality, not an entity. A
//! connection holds a set of filters; an event matches the connection if
//! any one filter matches the envelope's routing fields.

use serde::{Deserialize, Serialize};

use super::event::EventEnvelope;
use super::ids::{ProjectId, RunId, UserId};
use crate::error::GatewayError;

/// Subscription predicate with the canonical string forms `all`,
/// `run:<id>`, `project:<id>` and `user:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SubscriptionFilter {
    /// Matches every envelope.
    All,
    /// Matches envelopes routed to a specific run.
    Run(RunId),
    /// Matches envelopes routed to a specific project.
    Project(ProjectId),
    /// Matches envelopes routed to a specific user.
    User(UserId),
}

impl SubscriptionFilter {
    /// Returns `true` if this filter selects the given envelope.
    ///
    /// `All` matches unconditionally; the scoped variants match when the
    /// envelope carries the same routing identifier.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        match self {
            Self::All => true,
            Self::Run(id) => envelope.run_id.as_ref() == Some(id),
            Self::Project(id) => envelope.project_id.as_ref() == Some(id),
            Self::User(id) => envelope.user_id.as_ref() == Some(id),
        }
    }

    /// Returns the scope name (`all`, `run`, `project`, `user`).
    #[must_use]
    pub const fn scope(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Run(_) => "run",
            Self::Project(_) => "project",
            Self::User(_) => "user",
        }
    }
}

impl std::fmt::Display for SubscriptionFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Run(id) => write!(f, "run:{id}"),
            Self::Project(id) => write!(f, "project:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

impl std::str::FromStr for SubscriptionFilter {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        let invalid = || GatewayError::InvalidFilter(s.to_string());
        let (scope, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        match scope {
            "run" => Ok(Self::Run(RunId::new(id))),
            "project" => Ok(Self::Project(ProjectId::new(id))),
            "user" => Ok(Self::User(UserId::new(id))),
            _ => Err(invalid()),
        }
    }
}
