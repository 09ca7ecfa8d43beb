//! Ordered multi-subscriber listener lists.
//!
//! Listeners are kept per event name in registration order. Dispatch
//! snapshots the list before invoking anything, so a listener may register
//! or remove listeners (including itself) while an event is being delivered
//! without affecting the current delivery.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

// ============================================================================
// Types
// ============================================================================

/// Listener callback.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned on registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One registered listener.
struct Entry<T> {
    id: ListenerId,
    once: bool,
    /// Set when a `once` listener has fired.
    fired: Arc<AtomicBool>,
    callback: Listener<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            fired: Arc::clone(&self.fired),
            callback: Arc::clone(&self.callback),
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

/// Event emitter keyed by event name.
pub struct Emitter<T> {
    next_id: AtomicU64,
    listeners: Mutex<FxHashMap<String, Vec<Entry<T>>>>,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("Emitter")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Clone> Emitter<T> {
    /// Creates an emitter with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), false)
    }

    /// Registers a listener that is removed after its first call.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), true)
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Removes every listener for `event`.
    pub fn off_all(&self, event: &str) {
        self.listeners.lock().remove(event);
    }

    /// Returns the number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Delivers `payload` to every listener registered for `event`.
    ///
    /// Returns `true` if at least one listener was invoked.
    pub fn emit(&self, event: &str, payload: T) -> bool {
        let snapshot: Vec<Entry<T>> = {
            let mut listeners = self.listeners.lock();
            let Some(entries) = listeners.get_mut(event) else {
                return false;
            };
            let snapshot = entries.clone();
            entries.retain(|e| !e.once);
            snapshot
        };

        let mut invoked = false;
        for entry in snapshot {
            if entry.once && entry.fired.swap(true, Ordering::SeqCst) {
                continue;
            }
            (entry.callback)(payload.clone());
            invoked = true;
        }
        invoked
    }

    fn register(&self, event: &str, callback: Listener<T>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Entry {
                id,
                once,
                fired: Arc::new(AtomicBool::new(false)),
                callback,
            });
        id
    }
}

// ============================================================================
// Tests
// ============================================================================
