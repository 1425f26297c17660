//! Domain layer: identifiers, the typed event schema, and subscription
//! filters.
//!
//! This module contains the data model shared by the server side (manager,
//! broadcaster) and the client subscription module: routing identifiers,
//! the closed event envelope with its validation gate, and the filter
//! values that select recipient connections.

pub mod event;
pub mod filter;
pub mod ids;

pub use event::{EventBody, EventCategory, EventEnvelope, EventKind};
pub use filter::SubscriptionFilter;
pub use ids::{ClientId, ProjectId, RunId, UserId};
