//! Per-connection publish/subscribe registry keyed by event type.
//!
//! Handlers run synchronously, in registration order. A panicking handler is
//! isolated so its siblings still run. There are no wildcard subscriptions.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Token identifying one registered handler.
///
/// Closures have no usable identity in Rust, so removal works through the
/// token returned by [`EventDispatcher::on`] instead of handler equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Event-type → ordered handler list.
pub struct EventDispatcher {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a handler for `event_type`. Returns the removal token.
    pub fn on<F>(&self, event_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove the handler registered under `id`, if still present.
    ///
    /// Returns `true` if a handler was removed.
    pub fn off(&self, event_type: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() < before;
        if list.is_empty() {
            let _ = handlers.remove(event_type);
        }
        removed
    }

    /// Invoke all handlers for `event_type`, in registration order.
    ///
    /// Returns the number of handlers invoked. Handlers run outside the
    /// registry lock, so a handler may subscribe or unsubscribe reentrantly;
    /// such changes take effect on the next emit.
    pub fn emit(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.lock();
            match handlers.get(event_type) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => Vec::new(),
            }
        };
        for handler in &snapshot {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                error!(event_type, "event handler panicked; continuing with siblings");
            }
        }
        snapshot.len()
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .lock()
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
