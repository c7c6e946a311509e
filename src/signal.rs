//! Per-resource change notification.

use crate::handle::ResourceHandle;
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

new_key_type! {
    /// Key returned by [`ChangeSignal::connect`]
    pub struct SubscriptionKey;
}

type ChangeCallback = Arc<dyn Fn(ResourceHandle) + Send + Sync>;

/// Observer list fired after a successful mutation.
///
/// Subscribers must not mutate the emitting resource synchronously; a
/// nested `emit` on the same signal is dropped.
pub struct ChangeSignal {
    subscribers: Mutex<SlotMap<SubscriptionKey, ChangeCallback>>,
    emitting: AtomicBool,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(SlotMap::with_key()),
            emitting: AtomicBool::new(false),
        }
    }

    pub fn connect<F>(&self, callback: F) -> SubscriptionKey
    where
        F: Fn(ResourceHandle) + Send + Sync + 'static,
    {
        self.subscribers.lock().insert(Arc::new(callback))
    }

    pub fn disconnect(&self, key: SubscriptionKey) -> bool {
        self.subscribers.lock().remove(key).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Call every subscriber. Returns false if the emit was dropped
    /// because the signal is already firing.
    pub fn emit(&self, handle: ResourceHandle) -> bool {
        if self
            .emitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(%handle, "reentrant change signal dropped");
            return false;
        }

        // Snapshot so callbacks may connect/disconnect without deadlocking.
        let callbacks: Vec<ChangeCallback> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(handle);
        }

        self.emitting.store(false, Ordering::Release);
        true
    }
}

impl Default for ChangeSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSignal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
