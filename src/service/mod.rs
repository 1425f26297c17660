//! Service layer: the producer-facing publish surface.
//!
//! [`EventBroadcaster`] validates and stamps every event, then forwards it
//! to the connection manager and the durable bus.

pub mod broadcaster;

pub use broadcaster::EventBroadcaster;
