//! Typed publish/subscribe for server events.
//!
//! Handlers register against an event kind and receive every published
//! event of that kind until unsubscribed. A panicking handler is isolated
//! so the remaining handlers still run.

use dashmap::DashMap;
use session_types::{ServerEvent, ServerEventKind};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Opaque handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// In-process event bus keyed by server event kind.
#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<ServerEventKind, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of the given kind.
    pub fn on<F>(&self, kind: ServerEventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionId(id)
    }

    /// Remove a previously registered handler. Unknown ids are ignored.
    pub fn off(&self, subscription: SubscriptionId) {
        for mut entry in self.handlers.iter_mut() {
            entry.value_mut().retain(|(id, _)| *id != subscription.0);
        }
    }

    /// Deliver an event to every handler registered for its kind.
    ///
    /// Handlers may subscribe or unsubscribe from inside the callback;
    /// such changes take effect from the next publish.
    pub fn publish(&self, event: &ServerEvent) {
        let kind = event.kind();
        // Snapshot outside the map so a re-entrant on/off/clear cannot
        // deadlock against the shard lock.
        let handlers: Vec<(u64, Handler)> = match self.handlers.get(&kind) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for (id, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                warn!(?kind, subscription = id, "event handler panicked");
            }
        }
    }

    /// Drop every registered handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Number of handlers registered for a kind.
    pub fn handler_count(&self, kind: ServerEventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |h| h.len())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.len())
            .finish()
    }
}
