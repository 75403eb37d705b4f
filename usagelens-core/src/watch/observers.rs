//! Ordered observer registry with per-callback fault isolation.

use super::lock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// A subscriber callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`ObserverRegistry::add`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct RegistryInner<T> {
    next_id: u64,
    observers: Vec<(ObserverId, Callback<T>)>,
}

/// Subscribers held in registration order.
///
/// Dispatch iterates a snapshot, so callbacks may add or remove observers
/// while being called. A panicking callback is logged and skipped; the rest
/// still run.
pub struct ObserverRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T> Clone for ObserverRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 1,
                observers: Vec::new(),
            })),
        }
    }

    /// Register a callback; it runs after every earlier one.
    pub fn add(&self, callback: Callback<T>) -> ObserverId {
        let mut inner = lock(&self.inner);
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.observers.push((id, callback));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    pub fn clear(&self) {
        lock(&self.inner).observers.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every observer with `value`. Returns how many panicked.
    pub fn dispatch(&self, value: &T) -> usize {
        let snapshot: Vec<(ObserverId, Callback<T>)> = lock(&self.inner).observers.clone();
        let mut failures = 0;

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                failures += 1;
                tracing::error!(observer = id.0, "Observer panicked; continuing with the rest");
            }
        }

        failures
    }
}
