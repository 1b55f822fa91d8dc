//! Per-object registry of named-event listeners.
//!
//! Listeners are stored per event kind in registration order. `emit` walks a
//! snapshot of the list, so a listener registered during delivery only sees
//! later events.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Global counter for listener IDs.
static LISTENER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An event that can be delivered through an [`EventNotifier`].
pub trait Event: Send + Sync + 'static {
    /// Discriminant listeners register against.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`EventNotifier::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(LISTENER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: ListenerId,
    callback: Callback<E>,
}

/// Mapping from event kind to an ordered list of callbacks.
pub struct EventNotifier<E: Event> {
    listeners: Mutex<HashMap<E::Kind, Vec<Registration<E>>>>,
}

impl<E: Event> EventNotifier<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register `callback` for `kind`. Duplicate registrations all fire.
    pub fn on<F>(&self, kind: E::Kind, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.lock().entry(kind).or_default().push(Registration {
            id,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        for registrations in listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every listener registered for its kind.
    ///
    /// Returns the number of listeners invoked. The registry lock is not held
    /// while callbacks run.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Callback<E>> = match self.lock().get(&kind) {
            Some(registrations) => {
                registrations.iter().map(|r| Arc::clone(&r.callback)).collect()
            }
            None => return 0,
        };

        for callback in &snapshot {
            invoke(callback, event);
        }

        snapshot.len()
    }

    /// Deliver `event` to the single listener `id`.
    ///
    /// Returns false, without delivering, if `id` is not registered for the
    /// event's kind (for instance because it was removed in the meantime).
    pub fn emit_to(&self, id: ListenerId, event: &E) -> bool {
        let callback = match self.lock().get(&event.kind()) {
            Some(registrations) => registrations
                .iter()
                .find(|r| r.id == id)
                .map(|r| Arc::clone(&r.callback)),
            None => None,
        };

        match callback {
            Some(callback) => {
                invoke(&callback, event);
                true
            }
            None => false,
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<E::Kind, Vec<Registration<E>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invoke<E: Event>(callback: &Callback<E>, event: &E) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::error!(event = ?event.kind(), "Event listener panicked");
    }
}

impl<E: Event> Default for EventNotifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> Debug for EventNotifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.lock();
        let mut map = f.debug_map();
        for (kind, registrations) in listeners.iter() {
            map.entry(kind, &registrations.len());
        }
        map.finish()
    }
}
