//! Client-side event handler registry.
//!
//! Handlers are kept in registration order per event name. Dispatch clones
//! the handler list out of the lock before invoking, so a handler may add or
//! remove subscriptions without deadlocking.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Handle returned when subscribing; needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receives the raw argument payloads of one callback.
pub type CallbackHandler = Arc<dyn Fn(&[Vec<u8>]) + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, CallbackHandler)>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: impl Into<String>, handler: CallbackHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(event.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one subscription. Removing the last handler removes the name.
    pub fn remove(&self, event: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Invoke every handler of `event` in registration order.
    ///
    /// Returns the number of handlers invoked. A panicking handler is logged
    /// and does not stop the others.
    pub fn dispatch(&self, event: &str, arguments: &[Vec<u8>]) -> usize {
        let handlers: Vec<CallbackHandler> = match self.handlers.lock().get(event) {
            Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
            None => {
                trace!("No handlers for callback {}", event);
                return 0;
            }
        };

        for handler in &handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(arguments))).is_err() {
                warn!("Handler for callback {} panicked", event);
            }
        }
        handlers.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.handlers.lock().contains_key(event)
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_struct("CallbackRegistry")
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> CallbackHandler {
        let log = log.clone();
        Arc::new(move |args: &[Vec<u8>]| log.lock().push(format!("{}:{}", label, args.len())))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add("Changed", recorder(&log, "first"));
        registry.add("Changed", recorder(&log, "second"));

        assert_eq!(registry.dispatch("Changed", &[vec![1]]), 2);
        assert_eq!(*log.lock(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn test_remove_last_handler_removes_event() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.add("Changed", recorder(&log, "a"));
        let b = registry.add("Changed", recorder(&log, "b"));

        assert!(registry.remove("Changed", a));
        assert!(!registry.remove("Changed", a));
        assert_eq!(registry.handler_count("Changed"), 1);

        assert!(registry.remove("Changed", b));
        assert!(!registry.has_event("Changed"));
        assert_eq!(registry.dispatch("Changed", &[]), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let registry = Arc::new(CallbackRegistry::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner_registry = registry.clone();
        let inner_slot = slot.clone();
        let id = registry.add(
            "Once",
            Arc::new(move |_: &[Vec<u8>]| {
                if let Some(id) = *inner_slot.lock() {
                    inner_registry.remove("Once", id);
                }
            }),
        );
        *slot.lock() = Some(id);

        assert_eq!(registry.dispatch("Once", &[]), 1);
        assert!(!registry.has_event("Once"));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = CallbackRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add("Changed", Arc::new(|_: &[Vec<u8>]| panic!("boom")));
        registry.add("Changed", recorder(&log, "after"));

        assert_eq!(registry.dispatch("Changed", &[]), 2);
        assert_eq!(log.lock().len(), 1);
    }
}
