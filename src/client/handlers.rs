//! Caller-owned handler table keyed by event type and by category.
//!
//! The table belongs to the consumer, not the transport: reconnects tear
//! down and rebuild the socket but never touch registered handlers.
//! Dispatch isolates handlers from each other: one failing handler never
//! prevents delivery to the rest.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::domain::{EventCategory, EventEnvelope, EventKind};

/// Result of one handler invocation; failures are logged and isolated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered event handler.
pub type EventHandler = Arc<dyn Fn(&EventEnvelope) -> HandlerResult + Send + Sync>;

/// Opaque identifier of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(HandlerId, EventHandler)>>,
    by_category: HashMap<EventCategory, Vec<(HandlerId, EventHandler)>>,
}

/// Handler table shared between the consumer and the connection loop.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<RegistryInner>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event type.
    pub fn register_kind(&self, kind: EventKind, handler: EventHandler) -> HandlerId {
        let mut inner = self.inner.lock();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.by_kind.entry(kind).or_default().push((id, handler));
        id
    }

    /// Registers a handler for a whole event category.
    pub fn register_category(&self, category: EventCategory, handler: EventHandler) -> HandlerId {
        let mut inner = self.inner.lock();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner
            .by_category
            .entry(category)
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut inner = self.inner.lock();
        let mut removed = false;
        for handlers in inner.by_kind.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        for handlers in inner.by_category.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.by_kind.values().map(Vec::len).sum::<usize>()
            + inner.by_category.values().map(Vec::len).sum::<usize>()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every handler matching the envelope's type or category.
    ///
    /// The handler lists are snapshotted before invocation, so a handler
    /// may register or cancel registrations without deadlocking. Returns
    /// the number of handlers invoked.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        let kind = envelope.kind();
        let category = kind.category();
        let snapshot: Vec<EventHandler> = {
            let inner = self.inner.lock();
            let by_kind = inner
                .by_kind
                .get(&kind)
                .into_iter()
                .flatten()
                .map(|(_, h)| Arc::clone(h));
            let by_category = inner
                .by_category
                .get(&category)
                .into_iter()
                .flatten()
                .map(|(_, h)| Arc::clone(h));
            by_kind.chain(by_category).collect()
        };

        let mut invoked = 0;
        for handler in snapshot {
            invoked += 1;
            if let Err(e) = handler(envelope) {
                warn!(event_type = %kind, error = %e, "event handler failed");
            }
        }
        debug!(event_type = %kind, invoked, "dispatched event");
        invoked
    }
}

/// Disposer returned by a registration; [`cancel`](Self::cancel) removes
/// the handler. Dropping the guard without cancelling leaves the handler
/// registered for the life of the registry.
#[derive(Debug)]
pub struct HandlerGuard {
    registry: Weak<HandlerRegistry>,
    id: HandlerId,
}

impl HandlerGuard {
    pub(crate) fn new(registry: &Arc<HandlerRegistry>, id: HandlerId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
        }
    }

    /// Removes the registration. Idempotent across guards; returns `false`
    /// if the handler (or the registry) was already gone.
    pub fn cancel(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::domain::RunId;
    use crate::domain::event::{EventBody, RunFailedPayload, StageProgressPayload};
    use crate::domain::ProjectId;

    fn progress_envelope() -> EventEnvelope {
        EventEnvelope::new(EventBody::StageProgress(StageProgressPayload {
            run_id: RunId::new("r1"),
            stage: "render".to_string(),
            percent: 10,
            detail: None,
        }))
    }

    fn run_failed_envelope() -> EventEnvelope {
        EventEnvelope::new(EventBody::RunFailed(RunFailedPayload {
            run_id: RunId::new("r1"),
            project_id: ProjectId::new("p1"),
            reason: "boom".to_string(),
        }))
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            let _ = counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    #[test]
    fn kind_handler_invoked_for_matching_type_only() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = registry.register_kind(EventKind::StageProgress, counting_handler(&count));

        assert_eq!(registry.dispatch(&progress_envelope()), 1);
        assert_eq!(registry.dispatch(&run_failed_envelope()), 0);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn category_handler_sees_all_types_in_category() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ =
            registry.register_category(EventCategory::StageLifecycle, counting_handler(&count));

        let _ = registry.dispatch(&progress_envelope());
        // run.failed is RunLifecycle, not StageLifecycle.
        let _ = registry.dispatch(&run_failed_envelope());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn kind_and_category_handlers_both_fire() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = registry.register_kind(EventKind::StageProgress, counting_handler(&count));
        let _ =
            registry.register_category(EventCategory::StageLifecycle, counting_handler(&count));

        assert_eq!(registry.dispatch(&progress_envelope()), 2);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn failing_handler_does_not_block_others() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = registry.register_kind(
            EventKind::StageProgress,
            Arc::new(|_| Err("handler exploded".into())),
        );
        let _ = registry.register_kind(EventKind::StageProgress, counting_handler(&count));

        assert_eq!(registry.dispatch(&progress_envelope()), 2);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn remove_stops_invocation() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = registry.register_kind(EventKind::StageProgress, counting_handler(&count));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.dispatch(&progress_envelope()), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_cancel_removes_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let id = registry.register_kind(EventKind::StageProgress, counting_handler(&count));
        let guard = HandlerGuard::new(&registry, id);

        assert_eq!(registry.len(), 1);
        assert!(guard.cancel());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn guard_cancel_after_registry_drop_is_safe() {
        let registry = Arc::new(HandlerRegistry::new());
        let id = registry.register_kind(EventKind::StageProgress, Arc::new(|_| Ok(())));
        let guard = HandlerGuard::new(&registry, id);
        drop(registry);
        assert!(!guard.cancel());
    }

    #[test]
    fn handler_may_cancel_sibling_during_dispatch() {
        // The dispatch snapshot must keep this from deadlocking.
        let registry = Arc::new(HandlerRegistry::new());
        let registry_clone = Arc::clone(&registry);
        let victim = registry.register_kind(EventKind::StageProgress, Arc::new(|_| Ok(())));
        let _ = registry.register_kind(
            EventKind::StageProgress,
            Arc::new(move |_| {
                let _ = registry_clone.remove(victim);
                Ok(())
            }),
        );

        assert_eq!(registry.dispatch(&progress_envelope()), 2);
        assert_eq!(registry.dispatch(&progress_envelope()), 1);
    }
}
