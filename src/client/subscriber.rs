//! Reconnecting WebSocket consumer with automatic re-subscription.
//!
//! [`EventSubscriber`] maintains a live connection to the gateway,
//! survives transient disconnects with exponential backoff, re-sends its
//! desired filter set after every reconnect (the server keeps no memory
//! of a disconnected client), and runs every inbound frame through the
//! schema gate before any handler fires.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::handlers::{EventHandler, HandlerGuard, HandlerRegistry, HandlerResult};
use super::SubscriberError;
use crate::domain::{EventCategory, EventEnvelope, EventKind, SubscriptionFilter};
use crate::ws::messages::ControlFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Gateway WebSocket URL, e.g. `ws://127.0.0.1:3000/ws?user_id=u1`.
    pub url: String,
    /// Reconnection attempts before giving up (0 disables reconnection).
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound for the backoff delay.
    pub reconnect_max_delay: Duration,
}

impl SubscriberConfig {
    /// Creates a config with the default reconnection policy
    /// (5 attempts, 500 ms base delay, 30 s cap).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Observable connection state of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Not connected; terminal after an explicit [`EventSubscriber::disconnect`].
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and dispatching events.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Reconnection attempts exhausted.
    Error,
}

/// Instruction from the consumer API to the live connection loop.
#[derive(Debug)]
enum ClientCommand {
    /// Send a serialized control frame.
    SendFrame(String),
    /// Drop the current socket and reconnect immediately.
    Reconnect,
}

/// Why the connection loop ended.
enum ConnectionOutcome {
    /// Explicit `disconnect()`; no reconnection.
    Stopped,
    /// Transport loss or server close; reconnection applies.
    Lost,
}

/// Client-side session: socket, handler table, desired filters, retries.
///
/// The handler table and the desired filter set belong to the caller and
/// survive reconnects; only the transport is torn down and rebuilt.
#[derive(Debug)]
pub struct EventSubscriber {
    config: SubscriberConfig,
    handlers: Arc<HandlerRegistry>,
    desired_filters: Mutex<HashSet<SubscriptionFilter>>,
    state: Mutex<SubscriberState>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
    stop_tx: watch::Sender<bool>,
    retry_now: Notify,
}

impl EventSubscriber {
    /// Creates a subscriber; nothing connects until [`run`](Self::run).
    #[must_use]
    pub fn new(config: SubscriberConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            handlers: Arc::new(HandlerRegistry::new()),
            desired_filters: Mutex::new(HashSet::new()),
            state: Mutex::new(SubscriberState::Disconnected),
            command_tx: Mutex::new(None),
            stop_tx,
            retry_now: Notify::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    /// Registers a handler for one event type; the guard is the disposer.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    ) -> HandlerGuard {
        let handler: EventHandler = Arc::new(handler);
        let id = self.handlers.register_kind(kind, handler);
        HandlerGuard::new(&self.handlers, id)
    }

    /// Registers a handler for a whole category; the guard is the disposer.
    pub fn subscribe_category(
        &self,
        category: EventCategory,
        handler: impl Fn(&EventEnvelope) -> HandlerResult + Send + Sync + 'static,
    ) -> HandlerGuard {
        let handler: EventHandler = Arc::new(handler);
        let id = self.handlers.register_category(category, handler);
        HandlerGuard::new(&self.handlers, id)
    }

    /// Adds a filter to the desired set and, when connected, pushes a
    /// `control.subscribe` frame. The set is re-sent on every reconnect.
    pub fn add_filter(&self, filter: SubscriptionFilter) -> bool {
        let inserted = self.desired_filters.lock().insert(filter.clone());
        if inserted {
            self.send_command(ClientCommand::SendFrame(
                ControlFrame::Subscribe {
                    filters: vec![filter.to_string()],
                }
                .to_json(),
            ));
        }
        inserted
    }

    /// Removes a filter from the desired set and, when connected, pushes a
    /// `control.unsubscribe` frame.
    pub fn remove_filter(&self, filter: &SubscriptionFilter) -> bool {
        let removed = self.desired_filters.lock().remove(filter);
        if removed {
            self.send_command(ClientCommand::SendFrame(
                ControlFrame::Unsubscribe {
                    filters: vec![filter.to_string()],
                }
                .to_json(),
            ));
        }
        removed
    }

    /// Snapshot of the desired filter set.
    #[must_use]
    pub fn filters(&self) -> Vec<SubscriptionFilter> {
        self.desired_filters.lock().iter().cloned().collect()
    }

    /// Terminally stops the subscriber; no reconnection is attempted.
    pub fn disconnect(&self) {
        let _ = self.stop_tx.send(true);
        self.retry_now.notify_waiters();
    }

    /// Forces a fresh connection: drops the current socket if one is live,
    /// or skips a pending backoff delay.
    pub fn reconnect(&self) {
        self.send_command(ClientCommand::Reconnect);
        self.retry_now.notify_waiters();
    }

    /// Drives the connection until [`disconnect`](Self::disconnect) or
    /// exhaustion of the reconnection budget.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::AttemptsExhausted`] when the configured
    /// reconnection attempts are used up without a successful connection.
    pub async fn run(&self) -> Result<(), SubscriberError> {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut attempts: u32 = 0;
        let mut last_error = String::new();

        loop {
            if *stop_rx.borrow() {
                self.set_state(SubscriberState::Disconnected);
                return Ok(());
            }

            self.set_state(SubscriberState::Connecting);
            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _response)) => {
                    attempts = 0;
                    info!(url = %self.config.url, "connected to gateway");
                    self.set_state(SubscriberState::Connected);
                    let outcome = self.drive_connection(stream, &mut stop_rx).await;
                    *self.command_tx.lock() = None;
                    if matches!(outcome, ConnectionOutcome::Stopped) {
                        self.set_state(SubscriberState::Disconnected);
                        return Ok(());
                    }
                    last_error = "connection lost".to_string();
                }
                Err(e) => {
                    warn!(url = %self.config.url, error = %e, "connect failed");
                    last_error = e.to_string();
                }
            }

            if *stop_rx.borrow() {
                self.set_state(SubscriberState::Disconnected);
                return Ok(());
            }

            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                self.set_state(SubscriberState::Error);
                return Err(SubscriberError::AttemptsExhausted {
                    attempts: self.config.max_reconnect_attempts,
                    last_error,
                });
            }

            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
                attempts,
            );
            info!(attempt = attempts, ?delay, "reconnecting after backoff");
            self.set_state(SubscriberState::Reconnecting);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.retry_now.notified() => {
                    debug!("backoff skipped by manual reconnect");
                }
                _ = stop_rx.changed() => {}
            }
        }
    }

    /// Runs one live connection to completion.
    async fn drive_connection(
        &self,
        stream: WsStream,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> ConnectionOutcome {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        *self.command_tx.lock() = Some(command_tx);

        // Re-subscription: the server has no memory of prior filters.
        let filters: Vec<String> = self
            .desired_filters
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !filters.is_empty() {
            let frame = ControlFrame::Subscribe { filters }.to_json();
            if ws_tx.send(Message::text(frame)).await.is_err() {
                return ConnectionOutcome::Lost;
            }
        }

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch_frame(text.as_str()),
                        Some(Ok(Message::Ping(data))) => {
                            if ws_tx.send(Message::Pong(data)).await.is_err() {
                                return ConnectionOutcome::Lost;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("server closed connection");
                            return ConnectionOutcome::Lost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "transport error");
                            return ConnectionOutcome::Lost;
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(ClientCommand::SendFrame(json)) => {
                            if ws_tx.send(Message::text(json)).await.is_err() {
                                return ConnectionOutcome::Lost;
                            }
                        }
                        Some(ClientCommand::Reconnect) => {
                            debug!("manual reconnect requested");
                            let _ = ws_tx.send(Message::Close(None)).await;
                            return ConnectionOutcome::Lost;
                        }
                        None => return ConnectionOutcome::Lost,
                    }
                }
                _ = stop_rx.changed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return ConnectionOutcome::Stopped;
                }
            }
        }
    }

    /// Routes one inbound text frame: control frames are logged, event
    /// frames pass the schema gate and go to the handler table, malformed
    /// frames are dropped with a warning, never fatal to the connection.
    fn dispatch_frame(&self, text: &str) {
        if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
            match control {
                ControlFrame::Connected { client_id, .. } => {
                    debug!(%client_id, "session established");
                }
                ControlFrame::Ack { op, active, .. } => {
                    debug!(op, active, "subscription acknowledged");
                }
                ControlFrame::Error { code, message } => {
                    warn!(code, message, "gateway reported error");
                }
                ControlFrame::Subscribe { .. } | ControlFrame::Unsubscribe { .. } => {
                    warn!("ignoring client-direction control frame from server");
                }
            }
            return;
        }

        match EventEnvelope::parse(text) {
            Ok(envelope) => {
                let _ = self.handlers.dispatch(&envelope);
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
            }
        }
    }

    fn send_command(&self, command: ClientCommand) {
        if let Some(tx) = &*self.command_tx.lock() {
            let _ = tx.send(command);
        }
    }

    fn set_state(&self, next: SubscriberState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "subscriber state change");
            *state = next;
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2_u32.saturating_pow(exponent)).min(max)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::RunId;

    #[test]
    fn backoff_doubles_until_cap() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, max, 10), Duration::from_secs(30));
        assert_eq!(backoff_delay(base, max, 60), Duration::from_secs(30));
    }

    #[test]
    fn new_subscriber_is_disconnected() {
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
        assert!(subscriber.filters().is_empty());
    }

    #[test]
    fn desired_filters_deduplicate() {
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        let filter = SubscriptionFilter::Run(RunId::new("r1"));
        assert!(subscriber.add_filter(filter.clone()));
        assert!(!subscriber.add_filter(filter.clone()));
        assert_eq!(subscriber.filters().len(), 1);
        assert!(subscriber.remove_filter(&filter));
        assert!(!subscriber.remove_filter(&filter));
        assert!(subscriber.filters().is_empty());
    }

    #[test]
    fn handler_registration_and_disposal() {
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        let guard = subscriber.subscribe(EventKind::StageProgress, |_| Ok(()));
        let category_guard =
            subscriber.subscribe_category(EventCategory::Governance, |_| Ok(()));
        assert_eq!(subscriber.handlers.len(), 2);
        assert!(guard.cancel());
        assert!(category_guard.cancel());
        assert!(subscriber.handlers.is_empty());
    }

    #[tokio::test]
    async fn run_after_disconnect_returns_immediately() {
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        subscriber.disconnect();
        let result = subscriber.run().await;
        assert!(result.is_ok());
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_error_state() {
        let config = SubscriberConfig {
            url: "ws://127.0.0.1:1/ws".to_string(),
            max_reconnect_attempts: 2,
            reconnect_base_delay: Duration::from_millis(5),
            reconnect_max_delay: Duration::from_millis(10),
        };
        let subscriber = EventSubscriber::new(config);
        let result = subscriber.run().await;
        let Err(SubscriberError::AttemptsExhausted { attempts, .. }) = result else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempts, 2);
        assert_eq!(subscriber.state(), SubscriberState::Error);
    }

    #[test]
    fn malformed_frame_is_dropped_quietly() {
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        // No handlers registered; must not panic or alter state.
        subscriber.dispatch_frame("{\"type\":\"run.exploded\"}");
        subscriber.dispatch_frame("not json");
        assert_eq!(subscriber.state(), SubscriberState::Disconnected);
    }

    #[test]
    fn event_frame_reaches_handler() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let subscriber = EventSubscriber::new(SubscriberConfig::new("ws://127.0.0.1:1/ws"));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _guard = subscriber.subscribe(EventKind::StageProgress, move |_| {
            let _ = count_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let frame = serde_json::json!({
            "type": "stage.progress",
            "payload": {"run_id": "r1", "stage": "render", "percent": 10},
            "timestamp": "2026-08-07T12:00:00Z",
            "run_id": "r1",
        })
        .to_string();
        subscriber.dispatch_frame(&frame);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
