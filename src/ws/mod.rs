//! WebSocket layer: connection registry, session loops, control frames.
//!
//! The WebSocket endpoint at `/ws` carries the real-time event stream.
//! [`manager::ConnectionManager`] owns every live connection;
//! [`session::run_session`] drives one socket's read/write/heartbeat loop;
//! [`messages::ControlFrame`] defines the reserved `control.*` namespace
//! for subscribe/unsubscribe and server notices.

pub mod connection;
pub mod handler;
pub mod manager;
pub mod messages;
pub mod session;

pub use connection::{ClientIdentity, ConnectionHandle, ConnectionState, OutboundFrame};
pub use manager::{ConnectionManager, GatewayStats, ScopeCounts};
