//! Publish/subscribe keyed by event name.
//!
//! The engine only needs two things from a bus: attach a handler to an event
//! name and get back something that can detach it again, and emit a JSON
//! payload to whoever is attached. `LocalBus` does this in-process; the
//! desktop shell plugs the webview event system in through the same trait.
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A callback invoked with each payload emitted on its event.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

pub trait EventBus: Send + Sync {
    /// Attaches `handler` to `event`. The returned handle is the only way to
    /// detach it; dropping the handle leaves the handler attached.
    fn subscribe(&self, event: &str, handler: Handler) -> Subscription;

    /// Delivers `payload` to every handler currently attached to `event`.
    fn emit(&self, event: &str, payload: Value);
}

type Detach = Box<dyn FnOnce() + Send>;

/// Detachment handle for one handler.
pub struct Subscription {
    event: String,
    detach: Mutex<Option<Detach>>,
}

impl Subscription {
    pub fn new(event: impl Into<String>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            event: event.into(),
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_attached(&self) -> bool {
        self.detach
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Detaches the handler. Calling this again is a no-op.
    pub fn detach(&self) {
        let detach = self
            .detach
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(detach) = detach {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("attached", &self.is_attached())
            .finish()
    }
}

type HandlerTable = Mutex<HashMap<String, Vec<(u64, Handler)>>>;

/// In-process event bus. Handlers run synchronously on the emitting task,
/// in the order they were attached.
#[derive(Clone, Default)]
pub struct LocalBus {
    handlers: Arc<HandlerTable>,
    next_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers currently attached to `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }
}

fn remove_handler(table: &Weak<HandlerTable>, event: &str, id: u64) {
    let Some(table) = table.upgrade() else {
        return;
    };
    let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(list) = table.get_mut(event) {
        list.retain(|(handler_id, _)| *handler_id != id);
        if list.is_empty() {
            table.remove(event);
        }
    }
}

impl EventBus for LocalBus {
    fn subscribe(&self, event: &str, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_string())
            .or_default()
            .push((id, handler));

        let table = Arc::downgrade(&self.handlers);
        let name = event.to_string();
        Subscription::new(event, move || remove_handler(&table, &name, id))
    }

    fn emit(&self, event: &str, payload: Value) {
        // Snapshot first so handlers may attach or detach while running.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            log::trace!("No listeners for '{}'", event);
        }
        for handler in handlers {
            handler(&payload);
        }
    }
}
