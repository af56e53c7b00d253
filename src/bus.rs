//! Payload-free invalidation signal
//!
//! `publish` reaches only the listeners subscribed at that moment; nothing is
//! queued for later subscribers.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

/// Cloneable handle to one shared listener list
#[derive(Clone, Default)]
pub struct InvalidationBus {
    listeners: Arc<Listeners>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every current listener, synchronously.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn publish(&self) {
        let snapshot: Vec<Listener> = self
            .listeners
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!("Invalidation listener panicked");
            }
        }
    }

    /// Register a listener; dropping the returned handle unsubscribes it
    pub fn subscribe<F>(&self, listener: F) -> BusSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners.entries.lock().push((id, listener));

        BusSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.lock().len()
    }
}

/// Unsubscribes on drop
pub struct BusSubscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl BusSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.entries.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
