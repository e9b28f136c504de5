//! Keeps at most one {progress, completion} listener pair per operation family.
//!
//! Retrying an operation before the previous run's listeners were detached
//! would otherwise leave two progress handlers on the same event and every
//! line of the new run would be logged twice.
use crate::bus::{EventBus, Handler, Subscription};
use crate::models::OperationFamily;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct Slot {
    generation: u64,
    progress: Subscription,
    completion: Subscription,
}

impl Slot {
    fn detach(&self) {
        self.progress.detach();
        self.completion.detach();
    }
}

/// Identifies the listener pair installed by one `begin_operation` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTicket {
    pub family: OperationFamily,
    pub generation: u64,
}

pub struct SubscriptionGuard {
    bus: Arc<dyn EventBus>,
    slots: Mutex<HashMap<OperationFamily, Slot>>,
    generation: AtomicU64,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Detaches whatever pair `family` currently owns, then attaches the new
    /// handlers to the family's progress and completion events.
    pub fn begin_operation(
        &self,
        family: OperationFamily,
        on_progress: Handler,
        on_completion: Handler,
    ) -> OperationTicket {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slots.remove(&family) {
            log::debug!(
                "Detaching stale '{}' listeners (generation {})",
                family.key(),
                previous.generation
            );
            previous.detach();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let progress = self.bus.subscribe(&family.progress_event(), on_progress);
        let completion = self
            .bus
            .subscribe(&family.completion_event(), on_completion);
        slots.insert(
            family,
            Slot {
                generation,
                progress,
                completion,
            },
        );

        OperationTicket { family, generation }
    }

    /// Detaches and forgets the pair for `family`. No-op when nothing is attached.
    pub fn end_operation(&self, family: OperationFamily) {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&family);
        if let Some(slot) = slot {
            slot.detach();
        }
    }

    /// Ends the operation only if `ticket` still owns the family's listeners.
    ///
    /// A run that was superseded or dismissed must not tear down the
    /// listeners of whichever run replaced it.
    pub fn release(&self, ticket: &OperationTicket) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(&ticket.family) {
            Some(slot) if slot.generation == ticket.generation => {
                if let Some(slot) = slots.remove(&ticket.family) {
                    slot.detach();
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, ticket: &OperationTicket) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ticket.family)
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    pub fn is_active(&self, family: OperationFamily) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use serde_json::{json, Value};

    fn counting() -> (Arc<AtomicU64>, Handler) {
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        let handler: Handler = Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        (hits, handler)
    }

    #[test]
    fn second_begin_replaces_first_pair() {
        let bus = LocalBus::new();
        let guard = SubscriptionGuard::new(Arc::new(bus.clone()));
        let (first_hits, p1) = counting();
        let (_, c1) = counting();
        let (second_hits, p2) = counting();
        let (_, c2) = counting();

        guard.begin_operation(OperationFamily::Install, p1, c1);
        guard.begin_operation(OperationFamily::Install, p2, c2);

        assert_eq!(bus.subscriber_count("install-output"), 1);
        assert_eq!(bus.subscriber_count("install-finished"), 1);

        bus.emit("install-output", json!({"line": "Fetching", "source": "stdout"}));
        assert_eq!(first_hits.load(Ordering::Relaxed), 0);
        assert_eq!(second_hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn families_do_not_interfere() {
        let bus = LocalBus::new();
        let guard = SubscriptionGuard::new(Arc::new(bus.clone()));
        let (_, p1) = counting();
        let (_, c1) = counting();
        let (_, p2) = counting();
        let (_, c2) = counting();

        guard.begin_operation(OperationFamily::Install, p1, c1);
        guard.begin_operation(OperationFamily::Tap, p2, c2);
        guard.end_operation(OperationFamily::Install);

        assert_eq!(bus.subscriber_count("install-output"), 0);
        assert_eq!(bus.subscriber_count("tap-output"), 1);
        assert!(guard.is_active(OperationFamily::Tap));
    }

    #[test]
    fn stale_ticket_cannot_release_newer_run() {
        let bus = LocalBus::new();
        let guard = SubscriptionGuard::new(Arc::new(bus.clone()));
        let (_, p1) = counting();
        let (_, c1) = counting();
        let (_, p2) = counting();
        let (_, c2) = counting();

        let old = guard.begin_operation(OperationFamily::Uninstall, p1, c1);
        let new = guard.begin_operation(OperationFamily::Uninstall, p2, c2);

        assert!(!guard.release(&old));
        assert_eq!(bus.subscriber_count("uninstall-output"), 1);
        assert!(guard.is_current(&new));
        assert!(guard.release(&new));
        assert_eq!(bus.subscriber_count("uninstall-output"), 0);
    }

    #[test]
    fn end_without_begin_is_noop() {
        let guard = SubscriptionGuard::new(Arc::new(LocalBus::new()));
        guard.end_operation(OperationFamily::Doctor);
        guard.end_operation(OperationFamily::Doctor);
        assert!(!guard.is_active(OperationFamily::Doctor));
    }
}
