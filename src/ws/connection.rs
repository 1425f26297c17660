//! Per-connection state: lifecycle machine, filter set, outbound queue,
//! heartbeat liveness.
//!
//! A [`ConnectionHandle`] is created when a socket is accepted and owned by
//! the connection registry; it is destroyed when the socket closes or the
//! connection is force-terminated. Only the connection manager mutates it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{ClientId, EventEnvelope, ProjectId, RunId, SubscriptionFilter, UserId};

/// Connection lifecycle states.
///
/// `Connecting → Open → Closing → Closed`, with a direct `Open → Closed`
/// transition on abrupt socket failure. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, not yet registered.
    Connecting,
    /// Registered and eligible for delivery.
    Open,
    /// Close frame sent, waiting for the peer to acknowledge.
    Closing,
    /// Deregistered; no further writes.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if the transition to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Open, Self::Closing)
                | (Self::Open, Self::Closed)
                | (Self::Closing, Self::Closed)
                | (Self::Connecting, Self::Closed)
        )
    }
}

/// Frame queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A serialized JSON frame, shared across recipients of one broadcast.
    Text(Arc<String>),
    /// Instruction to send a close frame and end the session.
    Close,
}

/// Identity supplied at handshake time, already verified by the caller.
///
/// All fields optional; a connection with none is unauthenticated and,
/// depending on deployment policy, sees only global envelopes.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    /// Authenticated user, if any.
    pub user_id: Option<UserId>,
    /// Project context, if any.
    pub project_id: Option<ProjectId>,
    /// Run context, if any.
    pub run_id: Option<RunId>,
}

impl ClientIdentity {
    /// Returns `true` if any identity field is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.user_id.is_some() || self.project_id.is_some() || self.run_id.is_some()
    }
}

/// Server-side record of one live WebSocket connection.
pub struct ConnectionHandle {
    /// Unique connection ID, generated at accept time.
    pub id: ClientId,
    /// Handshake identity.
    pub identity: ClientIdentity,
    /// When the connection was accepted.
    pub connected_at: Instant,
    /// Active subscription filters.
    filters: Mutex<HashSet<SubscriptionFilter>>,
    /// Lifecycle state.
    state: Mutex<ConnectionState>,
    /// Bounded queue to the connection's writer task.
    tx: mpsc::Sender<OutboundFrame>,
    /// Whether a pong arrived since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or the accept) was observed.
    last_heartbeat: Mutex<Instant>,
    /// Frames dropped because the queue was full or closed.
    dropped_frames: AtomicU64,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Creates a handle in `Connecting` state.
    #[must_use]
    pub fn new(identity: ClientIdentity, tx: mpsc::Sender<OutboundFrame>) -> Self {
        let now = Instant::now();
        Self {
            id: ClientId::new(),
            identity,
            connected_at: now,
            filters: Mutex::new(HashSet::new()),
            state: Mutex::new(ConnectionState::Connecting),
            tx,
            is_alive: AtomicBool::new(true),
            last_heartbeat: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Attempts the transition to `next`.
    ///
    /// Returns `false` (and leaves the state unchanged) if the transition
    /// is illegal, e.g. any transition out of `Closed`.
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// Returns `true` if the connection is eligible for delivery.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Adds a filter. Idempotent; returns `false` if it was already held.
    pub fn add_filter(&self, filter: SubscriptionFilter) -> bool {
        self.filters.lock().insert(filter)
    }

    /// Removes a filter. Idempotent; returns `false` if it was not held.
    pub fn remove_filter(&self, filter: &SubscriptionFilter) -> bool {
        self.filters.lock().remove(filter)
    }

    /// Snapshot of the active filter set.
    #[must_use]
    pub fn filters(&self) -> Vec<SubscriptionFilter> {
        self.filters.lock().iter().cloned().collect()
    }

    /// Number of active filters.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.filters.lock().len()
    }

    /// Returns `true` if this connection should receive the envelope.
    ///
    /// Any one matching filter suffices. Unauthenticated connections are
    /// restricted to global envelopes unless `anonymous_full_feed` is set.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope, anonymous_full_feed: bool) -> bool {
        if !self.identity.is_authenticated() && !anonymous_full_feed && !envelope.is_global() {
            return false;
        }
        self.filters.lock().iter().any(|f| f.matches(envelope))
    }

    /// Enqueues a frame for the writer task without blocking.
    ///
    /// Returns `false` if the queue is full or closed; the frame is
    /// dropped for this connection only and the drop counter increments.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Records a heartbeat reply (or any liveness signal).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Checks and resets the liveness flag for the heartbeat tick.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last heartbeat reply (or the accept).
    #[must_use]
    pub fn last_heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::event::{EventBody, StageProgressPayload};

    fn make_handle(identity: ClientIdentity) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(identity, tx), rx)
    }

    fn run_envelope(run: &str) -> EventEnvelope {
        EventEnvelope::new(EventBody::StageProgress(StageProgressPayload {
            run_id: RunId::new(run),
            stage: "render".to_string(),
            percent: 5,
            detail: None,
        }))
    }

    fn authed() -> ClientIdentity {
        ClientIdentity {
            user_id: Some(UserId::new("u1")),
            project_id: None,
            run_id: None,
        }
    }

    #[test]
    fn new_handle_starts_connecting() {
        let (handle, _rx) = make_handle(ClientIdentity::default());
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(!handle.is_open());
    }

    #[test]
    fn legal_lifecycle_path() {
        let (handle, _rx) = make_handle(ClientIdentity::default());
        assert!(handle.set_state(ConnectionState::Open));
        assert!(handle.is_open());
        assert!(handle.set_state(ConnectionState::Closing));
        assert!(handle.set_state(ConnectionState::Closed));
    }

    #[test]
    fn abrupt_close_from_open() {
        let (handle, _rx) = make_handle(ClientIdentity::default());
        assert!(handle.set_state(ConnectionState::Open));
        assert!(handle.set_state(ConnectionState::Closed));
    }

    #[test]
    fn closed_is_terminal() {
        let (handle, _rx) = make_handle(ClientIdentity::default());
        assert!(handle.set_state(ConnectionState::Open));
        assert!(handle.set_state(ConnectionState::Closed));
        assert!(!handle.set_state(ConnectionState::Open));
        assert!(!handle.set_state(ConnectionState::Closing));
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[test]
    fn cannot_skip_open() {
        assert!(!ConnectionState::Connecting.can_transition_to(ConnectionState::Closing));
        assert!(!ConnectionState::Closing.can_transition_to(ConnectionState::Open));
    }

    #[test]
    fn filter_set_is_idempotent() {
        let (handle, _rx) = make_handle(authed());
        let filter = SubscriptionFilter::Run(RunId::new("r1"));
        assert!(handle.add_filter(filter.clone()));
        assert!(!handle.add_filter(filter.clone()));
        assert_eq!(handle.filter_count(), 1);
        assert!(handle.remove_filter(&filter));
        assert!(!handle.remove_filter(&filter));
        assert_eq!(handle.filter_count(), 0);
    }

    #[test]
    fn matches_any_filter() {
        let (handle, _rx) = make_handle(authed());
        handle.add_filter(SubscriptionFilter::Run(RunId::new("r2")));
        handle.add_filter(SubscriptionFilter::Run(RunId::new("r1")));
        assert!(handle.matches(&run_envelope("r1"), false));
        assert!(!handle.matches(&run_envelope("r9"), false));
    }

    #[test]
    fn anonymous_restricted_to_global() {
        let (handle, _rx) = make_handle(ClientIdentity::default());
        handle.add_filter(SubscriptionFilter::All);
        // Routed envelope is withheld from the anonymous connection...
        assert!(!handle.matches(&run_envelope("r1"), false));
        // ...unless the deployment opts in to the full feed.
        assert!(handle.matches(&run_envelope("r1"), true));
    }

    #[test]
    fn empty_filter_set_matches_nothing() {
        let (handle, _rx) = make_handle(authed());
        assert!(!handle.matches(&run_envelope("r1"), false));
    }

    #[tokio::test]
    async fn send_enqueues_frame() {
        let (handle, mut rx) = make_handle(authed());
        assert!(handle.send(OutboundFrame::Text(Arc::new("hi".to_string()))));
        let Some(OutboundFrame::Text(text)) = rx.recv().await else {
            panic!("expected text frame");
        };
        assert_eq!(&*text, "hi");
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(authed(), tx);
        assert!(handle.send(OutboundFrame::Close));
        assert!(!handle.send(OutboundFrame::Close));
        assert_eq!(handle.drop_count(), 1);
    }

    #[tokio::test]
    async fn closed_queue_drops_and_counts() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let handle = ConnectionHandle::new(authed(), tx);
        assert!(!handle.send(OutboundFrame::Close));
        assert_eq!(handle.drop_count(), 1);
    }

    #[test]
    fn heartbeat_flag_resets_on_check() {
        let (handle, _rx) = make_handle(authed());
        assert!(handle.check_alive());
        assert!(!handle.check_alive());
        handle.mark_alive();
        assert!(handle.check_alive());
    }

    #[test]
    fn identity_authentication() {
        assert!(!ClientIdentity::default().is_authenticated());
        assert!(authed().is_authenticated());
        let project_only = ClientIdentity {
            user_id: None,
            project_id: Some(ProjectId::new("p1")),
            run_id: None,
        };
        assert!(project_only.is_authenticated());
    }
}
