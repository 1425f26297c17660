//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Heartbeat cadence, queue sizing, the
//! durable-bus target and the unauthenticated-connection policy are all
//! deployment choices, not code.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Seconds between server-initiated heartbeat pings.
    pub heartbeat_interval_secs: u64,

    /// Seconds without a pong before a connection is force-closed.
    pub heartbeat_timeout_secs: u64,

    /// Capacity of each connection's outbound frame queue. A full queue
    /// drops the frame for that connection (best-effort delivery).
    pub send_queue_capacity: usize,

    /// Seconds to wait for graceful close acknowledgement on shutdown
    /// before forcing stragglers to CLOSED.
    pub drain_timeout_secs: u64,

    /// Master switch for the durable-bus mirror.
    pub bus_enabled: bool,

    /// Redis connection URL for the durable bus.
    pub bus_url: String,

    /// Topic (Redis channel) every validated envelope is mirrored to.
    pub bus_topic: String,

    /// Whether identity-less handshakes are accepted at all.
    pub allow_unauthenticated: bool,

    /// Whether unauthenticated connections holding an `all` filter see the
    /// full feed. When `false` (the default) they receive only global
    /// envelopes carrying no routing identifiers.
    pub unauthenticated_full_feed: bool,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .context("LISTEN_ADDR is not a valid socket address")?;

        let heartbeat_interval_secs = parse_env("HEARTBEAT_INTERVAL_SECS", 30);
        let heartbeat_timeout_secs = parse_env("HEARTBEAT_TIMEOUT_SECS", 60);
        let send_queue_capacity = parse_env("SEND_QUEUE_CAPACITY", 256);
        let drain_timeout_secs = parse_env("SHUTDOWN_DRAIN_TIMEOUT_SECS", 10);

        let bus_enabled = parse_env_bool("BUS_ENABLED", true);
        let bus_url =
            std::env::var("BUS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let bus_topic = std::env::var("BUS_TOPIC").unwrap_or_else(|_| "platform.events".to_string());

        let allow_unauthenticated = parse_env_bool("ALLOW_UNAUTHENTICATED", true);
        let unauthenticated_full_feed = parse_env_bool("UNAUTHENTICATED_FULL_FEED", false);

        Ok(Self {
            listen_addr,
            heartbeat_interval_secs,
            heartbeat_timeout_secs,
            send_queue_capacity,
            drain_timeout_secs,
            bus_enabled,
            bus_url,
            bus_topic,
            allow_unauthenticated,
            unauthenticated_full_feed,
        })
    }

    /// Heartbeat ping interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat timeout window as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Shutdown drain timeout as a [`Duration`].
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn base_config() -> GatewayConfig {
        GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap_or_else(|_| {
                panic!("valid addr");
            }),
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            send_queue_capacity: 256,
            drain_timeout_secs: 10,
            bus_enabled: false,
            bus_url: "redis://127.0.0.1:6379".to_string(),
            bus_topic: "platform.events".to_string(),
            allow_unauthenticated: true,
            unauthenticated_full_feed: false,
        }
    }

    #[test]
    fn duration_accessors() {
        let config = base_config();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn timeout_is_two_missed_intervals_by_default() {
        let config = base_config();
        assert_eq!(
            config.heartbeat_timeout_secs,
            config.heartbeat_interval_secs * 2
        );
    }
}
