//! # pulse-gateway
//!
//! Real-time event distribution gateway for the run-orchestration
//! platform: typed event schema, WebSocket connection manager, validated
//! publish surface, and a reconnecting client subscription module.
//!
//! The rest of the platform publishes through [`service::EventBroadcaster`]
//! and consumes through [`client::EventSubscriber`]; everything in between
//! (validation, routing, heartbeats, reconnection) is this crate.
//!
//! ## Architecture
//!
//! ```text
//! Producers (orchestration layer)
//!     │
//!     ├── EventBroadcaster (service/)   validate, stamp, fan out
//!     │       ├── ConnectionManager (ws/)   registry, routing, heartbeats
//!     │       │       └── /ws sessions → subscribed clients
//!     │       └── DurableBus (bus/)         best-effort audit mirror
//!     │
//!     ├── Event schema (domain/)        closed typed envelope, validation gate
//!     │
//!     └── EventSubscriber (client/)     reconnect, re-subscribe, dispatch
//! ```

pub mod api;
pub mod app_state;
pub mod bus;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
