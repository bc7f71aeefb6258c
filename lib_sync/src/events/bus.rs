//! # Event Bus
//!
//! Synchronous publish/subscribe registry keyed by [`EventName`].
//!
//! ## Dispatch rules:
//!
//! 1.  `publish` snapshots the subscriber list under the lock and releases the
//!     lock before calling anything. Callbacks may therefore subscribe,
//!     unsubscribe or publish re-entrantly, and none of that changes the
//!     delivery set of the publish already in progress.
//! 2.  Callbacks run in registration order, each behind `catch_unwind`. A
//!     panicking subscriber is logged and skipped; the remaining subscribers
//!     still run and the publisher never sees the panic.
//! 3.  A [`Subscription`] is the only way to end a registration early.
//!     `unsubscribe` is idempotent, and dropping the handle unsubscribes.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error};

use super::names::{BusEvent, EventName};

type Callback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<EventName, Vec<Subscriber>>,
}

impl Registry {
    fn remove(&mut self, name: EventName, id: u64) -> bool {
        let Some(list) = self.subscribers.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.subscribers.remove(&name);
        }
        removed
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe service object. Clones share one registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        let total: usize = registry.subscribers.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("subscribers", &total).finish()
    }
}

impl EventBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `name`. Keep the returned handle alive for as
    /// long as the callback should run.
    pub fn subscribe<F>(&self, name: EventName, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.entry(name).or_default().push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        drop(registry);

        debug!(event = %name, subscriber = id, "subscribed");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            name,
            id,
            armed: AtomicBool::new(true),
        }
    }

    /// Deliver `event` to every callback subscribed to its name at the moment
    /// of the call. Returns how many callbacks were invoked.
    pub fn publish(&self, event: BusEvent) -> usize {
        let name = event.name();
        let snapshot: Vec<(u64, Callback)> = {
            let registry = lock(&self.registry);
            registry
                .subscribers
                .get(&name)
                .map(|list| list.iter().map(|s| (s.id, Arc::clone(&s.callback))).collect())
                .unwrap_or_default()
        };

        debug!(event = %name, subscribers = snapshot.len(), "publishing");
        for (id, callback) in &snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                error!(
                    event = %name,
                    subscriber = id,
                    "subscriber panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        snapshot.len()
    }

    /// Drop the subscribers of one event, or of every event with `None`.
    /// Outstanding handles become no-ops.
    pub fn clear(&self, name: Option<EventName>) {
        let mut registry = lock(&self.registry);
        match name {
            Some(name) => {
                registry.subscribers.remove(&name);
            }
            None => registry.subscribers.clear(),
        }
    }

    /// Number of live subscriptions for `name`.
    pub fn subscriber_count(&self, name: EventName) -> usize {
        lock(&self.registry)
            .subscribers
            .get(&name)
            .map_or(0, Vec::len)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Capability to end one registration. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    name: EventName,
    id: u64,
    armed: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.name)
            .field("id", &self.id)
            .field("armed", &self.armed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Subscription {
    /// Remove the callback. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).remove(self.name, self.id) {
                debug!(event = %self.name, subscriber = self.id, "unsubscribed");
            }
        }
    }

    /// Whether this handle can still unsubscribe.
    pub fn is_active(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// The event this subscription listens to.
    pub fn event(&self) -> EventName {
        self.name
    }

    /// Give up the handle and keep the callback registered for the lifetime
    /// of the bus (or until `clear`).
    pub fn detach(self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
