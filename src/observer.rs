//! Per-component observer lists.
//!
//! Each stateful component owns an [`Observers`] list for its own event type.
//! Listeners are invoked after the component has released its state lock, so
//! a listener may read back the component (or unsubscribe itself) without
//! deadlocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle returned by [`Observers::subscribe`].
pub type ObserverId = u64;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered list of listeners for events of type `E`.
pub struct Observers<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ObserverId, Listener<E>)>>,
}

impl<E> Observers<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners run in subscription order.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Deliver `event` to every listener registered at the time of the call.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for Observers<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_reaches_listeners_in_order() {
        let observers: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        observers.subscribe(move |value| first.lock().push(("first", *value)));
        let second = Arc::clone(&seen);
        observers.subscribe(move |value| second.lock().push(("second", *value)));

        observers.notify(&7);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observers: Observers<()> = Observers::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let id = observers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observers.notify(&());
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let observers: Arc<Observers<()>> = Arc::new(Observers::new());
        let handle = Arc::new(Mutex::new(None));
        let inner_observers = Arc::clone(&observers);
        let inner_handle = Arc::clone(&handle);
        let id = observers.subscribe(move |_| {
            if let Some(id) = *inner_handle.lock() {
                inner_observers.unsubscribe(id);
            }
        });
        *handle.lock() = Some(id);

        observers.notify(&());
        assert_eq!(observers.len(), 0);
    }
}
