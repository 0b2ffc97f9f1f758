//! EventEmitter<T> — typed synchronous pub/sub.
//!
//! Snapshot-on-emit semantics:
//!   - A listener removed *during* emission is still called in that round.
//!   - A listener added *during* emission is NOT called until the next emit.
//!
//! The internal lock is released before any callback runs, so listeners may
//! subscribe/unsubscribe reentrantly without deadlocking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies one registered listener. Ids are monotonic, so their order is
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Typed synchronous event emitter.
pub struct EventEmitter<T> {
    /// Keyed by id; BTreeMap iteration yields listeners in registration
    /// order and makes unsubscribe a keyed removal.
    listeners: Mutex<BTreeMap<SubscriptionId, Listener<T>>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback`, returning an id for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, Arc::new(callback));
        id
    }

    /// Remove a listener. Unknown ids are ignored, so double-unsubscribe is safe.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id);
    }

    /// Deliver `event` to every listener registered at the start of the call.
    pub fn emit(&self, event: &T) {
        // Snapshot under the lock (ref-count bumps only), then release it so
        // callbacks can reenter subscribe/unsubscribe.
        let snapshot: Vec<Listener<T>> = {
            let guard = self.listeners.lock();
            guard.values().map(Arc::clone).collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
