// ── Event subscription registry ──
//
// Handlers are keyed by event type. Dispatch snapshots the handler list
// first, so a handler may subscribe or unsubscribe without deadlocking
// and mutations only take effect for the next event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::frame::HubEvent;

/// Error a handler may return; logged and swallowed by the dispatcher.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for every event of the subscribed type.
pub type EventHandler = Arc<dyn Fn(&HubEvent) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
pub(crate) struct Registry {
    handlers: DashMap<String, Vec<(u64, EventHandler)>>,
    next_key: AtomicU64,
}

impl Registry {
    pub(crate) fn insert(&self, event_type: &str, handler: EventHandler) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(event_type.to_owned())
            .or_default()
            .push((key, handler));
        key
    }

    /// Remove one handler. Removing an unknown key is a no-op.
    pub(crate) fn remove(&self, event_type: &str, key: u64) {
        let now_empty = match self.handlers.get_mut(event_type) {
            Some(mut list) => {
                list.retain(|(k, _)| *k != key);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.handlers
                .remove_if(event_type, |_, list| list.is_empty());
        }
    }

    pub(crate) fn clear(&self) {
        self.handlers.clear();
    }

    pub(crate) fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, |list| list.len())
    }

    /// Invoke every handler registered for the event's type, in
    /// registration order. Returns the number of handlers invoked.
    pub(crate) fn dispatch(&self, event: &HubEvent) -> usize {
        let snapshot: Vec<EventHandler> = match self.handlers.get(&event.event_type) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                debug!(event_type = %event.event_type, "event without subscribers");
                return 0;
            }
        };

        for handler in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(event_type = %event.event_type, error = %e, "event handler failed");
                }
                Err(_) => {
                    warn!(event_type = %event.event_type, "event handler panicked");
                }
            }
        }
        snapshot.len()
    }
}

/// Handle returned by `ConnectionManager::subscribe`.
///
/// Dropping it unsubscribes. Call [`Subscription::detach`] to keep the
/// handler registered for the lifetime of the manager.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    registry: Weak<Registry>,
    event_type: String,
    key: u64,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(registry: &Arc<Registry>, event_type: String, key: u64) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            event_type,
            key,
            active: true,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove the handler now. Calling it twice is harmless.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event_type, self.key);
        }
    }

    /// Leave the handler registered and forget the handle.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}
