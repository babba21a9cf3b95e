//! Observer registration with explicit unsubscribe handles
//!
//! `subscribe` returns a `Subscription`; calling `cancel` on it removes the
//! observer. Dropping the handle without cancelling leaves the observer
//! registered for the lifetime of the set.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    observers: Vec<(u64, Observer<T>)>,
}

/// A set of observers notified in registration order
pub struct ObserverSet<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> ObserverSet<T> {
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 0, observers: Vec::new() })) }
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.observers.push((id, Arc::new(observer)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().observers.retain(|(oid, _)| *oid != id);
            }
        })
    }

    /// Call every observer. The registry lock is released before any
    /// observer runs, so observers may subscribe or cancel re-entrantly.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Observer<T>> =
            self.registry.lock().observers.iter().map(|(_, o)| o.clone()).collect();
        for observer in snapshot {
            observer(value);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ObserverSet<T> {
    fn clone(&self) -> Self {
        Self { registry: self.registry.clone() }
    }
}

/// Handle returned by `subscribe`; `cancel` unregisters the observer
#[must_use = "keep the subscription to be able to cancel it"]
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { cancel: Mutex::new(Some(Box::new(cancel))) }
    }

    /// Unregister the observer. Calling more than once is a no-op.
    pub fn cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.lock().is_some()).finish()
    }
}
