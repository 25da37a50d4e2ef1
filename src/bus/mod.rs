//! Publish/subscribe fan-out of tracker events.
//!
//! Producers (sensor feeds, the service observer) call [`EventBus::publish`];
//! every subscriber registered at that moment receives the event, in
//! registration order. Callbacks run on the publishing thread, outside the
//! registry lock, so a callback may subscribe or unsubscribe without
//! deadlocking. A failing or panicking callback is logged and skipped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use indexmap::IndexMap;
use log::{error, warn};

use crate::error::{readable_thread_panic_error, SubscriberError};
use crate::tracking::types::TrackerEvent;

pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &TrackerEvent) -> Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&TrackerEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, event: &TrackerEvent) -> Result<(), SubscriberError> {
        self(event)
    }
}

pub type SubscriberHandle = Arc<dyn Subscriber>;

// Registration is by identity of the shared allocation, not by value.
fn identity(handle: &SubscriberHandle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<IndexMap<usize, SubscriberHandle>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    fn registry(&self) -> MutexGuard<'_, IndexMap<usize, SubscriberHandle>> {
        // callbacks never run under this lock, a poisoned registry is still consistent
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` if `handle` was already registered.
    pub fn subscribe(&self, handle: SubscriberHandle) -> bool {
        let mut registry = self.registry();
        let key = identity(&handle);

        if registry.contains_key(&key) {
            return false;
        }

        registry.insert(key, handle);
        true
    }

    /// Returns `false` if `handle` was not registered.
    pub fn unsubscribe(&self, handle: &SubscriberHandle) -> bool {
        self.registry().shift_remove(&identity(handle)).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    /// Delivers `event` to a snapshot of the current subscribers and returns the
    /// number of callbacks that completed without error.
    pub fn publish(&self, event: &TrackerEvent) -> usize {
        let snapshot: Vec<SubscriberHandle> = self.registry().values().cloned().collect();
        let mut delivered = 0;

        for subscriber in snapshot {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!("Subscriber failed to handle {:?}: {}", event, err);
                },
                Err(panic) => {
                    error!("Subscriber failed to handle {:?}: {}", event, readable_thread_panic_error(&panic));
                },
            }
        }

        delivered
    }
}
