//! Monotonic request identities for interruptible fetches.
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;

/// Issues strictly increasing ids; only the latest issued id is current.
///
/// Closing the consumer (a details dialog, say) issues an id nobody holds,
/// which turns every in-flight response into a stale one.
#[derive(Debug, Default)]
pub struct RequestGuard {
    latest: AtomicU64,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_request_id(&self) -> RequestId {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        self.latest.load(Ordering::SeqCst) == id
    }

    /// Invalidates every outstanding request.
    pub fn invalidate_all(&self) {
        self.next_request_id();
    }

    /// Invalidates `id` if it is still the current request. Returns whether
    /// anything changed; invalidating an already stale id does nothing.
    pub fn invalidate(&self, id: RequestId) -> bool {
        self.latest
            .compare_exchange(id, id + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
