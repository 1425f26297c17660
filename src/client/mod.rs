//! Client subscription module: the consuming side of the event stream.
//!
//! [`EventSubscriber`] owns the connection to the gateway and the
//! caller's handler table. It reconnects with exponential backoff after
//! unexpected closes, re-sends the desired filter set on every reconnect,
//! and validates every frame before dispatching to handlers.

pub mod handlers;
pub mod subscriber;

pub use handlers::{EventHandler, HandlerGuard, HandlerRegistry, HandlerResult};
pub use subscriber::{EventSubscriber, SubscriberConfig, SubscriberState};

/// Client-side failure modes.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// The reconnection budget was spent without a successful connection.
    #[error("reconnection attempts exhausted after {attempts} tries: {last_error}")]
    AttemptsExhausted {
        /// Configured attempt limit that was reached.
        attempts: u32,
        /// Description of the final failure.
        last_error: String,
    },
}
