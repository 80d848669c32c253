//! Ordered observer registry shared by the notification hub and the error reporter.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

trait Deregister: Send + Sync {
    fn deregister(&self, id: u64);
}

struct Registry<T> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T> Deregister for Registry<T> {
    fn deregister(&self, id: u64) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Listeners are invoked in registration order. Each invocation is isolated: a panicking
/// listener is logged and skipped, later listeners still run.
pub(crate) struct Listeners<T> {
    registry: Arc<Registry<T>>,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn add<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let registry: Arc<dyn Deregister> = Arc::<Registry<T>>::clone(&self.registry);
        ListenerHandle {
            registry: Arc::downgrade(&registry),
            id,
        }
    }

    /// Call every listener with `item`. Callbacks run outside the registry lock so a
    /// listener may register or remove listeners while being notified.
    pub(crate) fn notify(&self, item: &T) {
        let snapshot: Vec<Callback<T>> = self
            .registry
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(item))) {
                let reason = panic_message(panic.as_ref());
                #[cfg(feature = "tracing")]
                tracing::error!(%reason, "listener panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = reason;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Deregistration handle returned when adding a listener.
///
/// Dropping the handle keeps the listener registered; call [`ListenerHandle::remove`] to
/// stop receiving events.
pub struct ListenerHandle {
    registry: Weak<dyn Deregister>,
    id: u64,
}

impl ListenerHandle {
    /// Remove the listener. Does nothing if its registry is already gone.
    pub fn remove(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
