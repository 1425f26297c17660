//! Per-connection session loop: socket I/O, control dispatch, heartbeat.
//!
//! Each accepted socket runs [`run_session`] to completion in its own
//! task. The loop multiplexes three sources: frames from the client,
//! frames queued by broadcasts, and the heartbeat timer. The timer is
//! owned exclusively by this session; nothing is shared across
//! connections, so one connection's failure or slowness never stalls
//! another.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::connection::{ClientIdentity, ConnectionHandle, ConnectionState, OutboundFrame};
use super::manager::ConnectionManager;
use super::messages::ControlFrame;
use crate::domain::SubscriptionFilter;
use crate::error::GatewayError;

/// Runs the full lifecycle of one WebSocket connection.
///
/// Registers with the manager, sends the `control.connected` hello, then
/// drives the read/write/heartbeat loop until the client closes, the
/// transport fails, the heartbeat times out, or the manager shuts down.
/// Deregisters on every exit path.
pub async fn run_session(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    identity: ClientIdentity,
    initial_filters: Vec<SubscriptionFilter>,
) {
    let (handle, mut outbound_rx) = match manager.accept(identity, initial_filters).await {
        Ok(pair) => pair,
        Err(e) => {
            // The upgrade handler already enforces policy; losing the race
            // against a config reload is the only way to get here.
            warn!(error = %e, "handshake rejected after upgrade");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello = ControlFrame::Connected {
        client_id: handle.id,
        timestamp: chrono::Utc::now(),
    };
    if ws_tx.send(Message::text(hello.to_json())).await.is_err() {
        let _ = manager.remove(handle.id).await;
        return;
    }

    let mut ping_interval = tokio::time::interval(manager.heartbeat_interval());
    // Skip the immediate first tick.
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            // Incoming frame from the client.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) =
                            handle_control_frame(text.as_str(), &handle, &manager).await
                            && ws_tx.send(Message::text(reply)).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        handle.mark_alive();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client_id = %handle.id, "client closed connection");
                        let _ = handle.set_state(ConnectionState::Closing);
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(client_id = %handle.id, "ignoring binary frame");
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %handle.id, error = %e, "transport error");
                        break;
                    }
                }
            }
            // Frame queued by a broadcast or by the manager.
            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Text(json)) => {
                        if ws_tx.send(Message::text(json.as_str())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close) => {
                        debug!(client_id = %handle.id, "server closing connection");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                }
            }
            // Heartbeat tick: verify the last ping was answered, send the next.
            _ = ping_interval.tick() => {
                if !handle.check_alive()
                    && handle.last_heartbeat_elapsed() > manager.heartbeat_timeout()
                {
                    warn!(
                        client_id = %handle.id,
                        timeout = ?manager.heartbeat_timeout(),
                        "heartbeat timeout, closing connection"
                    );
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(client_id = %handle.id, dropped = handle.drop_count(), "session ended");
    let _ = manager.remove(handle.id).await;
}

/// Handles one text frame from the client, returning an optional reply.
///
/// Only `control.subscribe` and `control.unsubscribe` are accepted from
/// clients; everything else is answered with a `control.error` frame and
/// otherwise ignored; a bad frame is never fatal to the connection.
async fn handle_control_frame(
    text: &str,
    handle: &ConnectionHandle,
    manager: &ConnectionManager,
) -> Option<String> {
    let frame = match serde_json::from_str::<ControlFrame>(text) {
        Ok(frame) => frame,
        Err(_) => {
            debug!(client_id = %handle.id, "malformed frame from client");
            return Some(
                ControlFrame::Error {
                    code: GatewayError::MalformedEvent(String::new()).error_code(),
                    message: "malformed or unsupported frame".to_string(),
                }
                .to_json(),
            );
        }
    };

    match frame {
        ControlFrame::Subscribe { filters } => {
            apply_filters(handle, manager, filters, true).await
        }
        ControlFrame::Unsubscribe { filters } => {
            apply_filters(handle, manager, filters, false).await
        }
        ControlFrame::Connected { .. } | ControlFrame::Ack { .. } | ControlFrame::Error { .. } => {
            Some(
                ControlFrame::Error {
                    code: GatewayError::MalformedEvent(String::new()).error_code(),
                    message: "unexpected control frame".to_string(),
                }
                .to_json(),
            )
        }
    }
}

/// Parses and applies a subscribe/unsubscribe filter list.
async fn apply_filters(
    handle: &ConnectionHandle,
    manager: &ConnectionManager,
    raw_filters: Vec<String>,
    subscribe: bool,
) -> Option<String> {
    let mut parsed = Vec::with_capacity(raw_filters.len());
    for raw in &raw_filters {
        match raw.parse::<SubscriptionFilter>() {
            Ok(filter) => parsed.push(filter),
            Err(e) => {
                return Some(
                    ControlFrame::Error {
                        code: e.error_code(),
                        message: e.to_string(),
                    }
                    .to_json(),
                );
            }
        }
    }

    let op = if subscribe { "subscribe" } else { "unsubscribe" };
    let mut active = handle.filter_count();
    for filter in parsed {
        let result = if subscribe {
            manager.subscribe(handle.id, filter).await
        } else {
            manager.unsubscribe(handle.id, &filter).await
        };
        match result {
            Ok(count) => active = count,
            Err(e) => {
                return Some(
                    ControlFrame::Error {
                        code: e.error_code(),
                        message: e.to_string(),
                    }
                    .to_json(),
                );
            }
        }
    }

    Some(
        ControlFrame::Ack {
            op: op.to_string(),
            accepted: raw_filters,
            active,
        }
        .to_json(),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::domain::{RunId, UserId};

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap_or_else(|_| panic!("valid addr")),
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            send_queue_capacity: 8,
            drain_timeout_secs: 1,
            bus_enabled: false,
            bus_url: String::new(),
            bus_topic: "platform.events".to_string(),
            allow_unauthenticated: true,
            unauthenticated_full_feed: false,
        }
    }

    async fn accepted_handle(
        manager: &ConnectionManager,
    ) -> (
        Arc<ConnectionHandle>,
        tokio::sync::mpsc::Receiver<OutboundFrame>,
    ) {
        let identity = ClientIdentity {
            user_id: Some(UserId::new("u1")),
            project_id: None,
            run_id: None,
        };
        let Ok(pair) = manager.accept(identity, Vec::new()).await else {
            panic!("accept failed");
        };
        pair
    }

    #[tokio::test]
    async fn subscribe_frame_acked_with_count() {
        let manager = ConnectionManager::new(&test_config());
        let (handle, _rx) = accepted_handle(&manager).await;

        let frame = ControlFrame::Subscribe {
            filters: vec!["run:r1".to_string(), "all".to_string()],
        }
        .to_json();
        let Some(reply) = handle_control_frame(&frame, &handle, &manager).await else {
            panic!("expected ack");
        };
        let Ok(ControlFrame::Ack { op, active, .. }) = serde_json::from_str(&reply) else {
            panic!("expected control.ack, got {reply}");
        };
        assert_eq!(op, "subscribe");
        assert_eq!(active, 2);
        assert_eq!(handle.filter_count(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_frame_removes_filter() {
        let manager = ConnectionManager::new(&test_config());
        let (handle, _rx) = accepted_handle(&manager).await;
        handle.add_filter(SubscriptionFilter::Run(RunId::new("r1")));

        let frame = ControlFrame::Unsubscribe {
            filters: vec!["run:r1".to_string()],
        }
        .to_json();
        let Some(reply) = handle_control_frame(&frame, &handle, &manager).await else {
            panic!("expected ack");
        };
        let Ok(ControlFrame::Ack { active, .. }) = serde_json::from_str(&reply) else {
            panic!("expected control.ack, got {reply}");
        };
        assert_eq!(active, 0);
    }

    #[tokio::test]
    async fn malformed_frame_answered_not_fatal() {
        let manager = ConnectionManager::new(&test_config());
        let (handle, _rx) = accepted_handle(&manager).await;

        let Some(reply) = handle_control_frame("not json", &handle, &manager).await else {
            panic!("expected error frame");
        };
        let Ok(ControlFrame::Error { code, .. }) = serde_json::from_str(&reply) else {
            panic!("expected control.error, got {reply}");
        };
        assert_eq!(code, 1002);
        // The connection record is untouched.
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn invalid_filter_rejected_with_code() {
        let manager = ConnectionManager::new(&test_config());
        let (handle, _rx) = accepted_handle(&manager).await;

        let frame = ControlFrame::Subscribe {
            filters: vec!["pool:x".to_string()],
        }
        .to_json();
        let Some(reply) = handle_control_frame(&frame, &handle, &manager).await else {
            panic!("expected error frame");
        };
        let Ok(ControlFrame::Error { code, .. }) = serde_json::from_str(&reply) else {
            panic!("expected control.error, got {reply}");
        };
        assert_eq!(code, 1004);
        assert_eq!(handle.filter_count(), 0);
    }

    #[tokio::test]
    async fn server_to_client_frames_rejected_from_client() {
        let manager = ConnectionManager::new(&test_config());
        let (handle, _rx) = accepted_handle(&manager).await;

        let frame = ControlFrame::Ack {
            op: "subscribe".to_string(),
            accepted: Vec::new(),
            active: 0,
        }
        .to_json();
        let Some(reply) = handle_control_frame(&frame, &handle, &manager).await else {
            panic!("expected error frame");
        };
        assert!(reply.contains("control.error"));
    }
}
