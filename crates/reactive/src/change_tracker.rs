//! Change tracking and observer notification.
//!
//! This module provides `ChangeTracker` which keeps the active observers of
//! a database and routes each committed transaction to the observers whose
//! region it modified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};
use vigil_core::Region;
use vigil_storage::TableCache;

/// Unique identifier for a registered observer.
pub type ObserverId = u64;

/// An observer of committed transactions.
pub trait TransactionObserver: Send + Sync {
    /// Returns true if a transaction that changed `changes` may have
    /// modified what the observer reads.
    fn observes(&self, changes: &Region) -> bool;

    /// Called once per relevant committed transaction, with the state that
    /// transaction committed.
    ///
    /// Runs on the writer thread, inside the commit, before any other
    /// transaction can begin.
    fn database_did_change(self: Arc<Self>, snapshot: Arc<TableCache>);

    /// Returns false once the observer is cancelled or failed.
    fn is_live(&self) -> bool;
}

/// Registry of the observers of one database.
///
/// # Example
///
/// ```ignore
/// let tracker = Arc::new(ChangeTracker::new());
/// let id = tracker.next_observer_id();
/// tracker.register(id, observer);
///
/// // On every commit, from the writer:
/// tracker.report_changes(&changes, &committed);
/// ```
pub struct ChangeTracker {
    /// Observer ID -> observer
    observers: Mutex<HashMap<ObserverId, Arc<dyn TransactionObserver>>>,
    /// Next observer ID to assign
    next_id: AtomicU64,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserves an ID for an observer about to be registered.
    pub fn next_observer_id(&self) -> ObserverId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers an observer.
    pub fn register(&self, id: ObserverId, observer: Arc<dyn TransactionObserver>) {
        self.observers.lock().insert(id, observer);
        debug!(observer = id, "observer registered");
    }

    /// Removes an observer. Returns true if it was registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().remove(&id);
        if removed.is_some() {
            debug!(observer = id, "observer removed");
        }
        // The observer is dropped here, outside of the lock.
        removed.is_some()
    }

    /// Returns the number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Returns true if there are no registered observers.
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }

    /// Notifies the observers modified by a committed transaction.
    ///
    /// Must be called by the writer exactly once per committed transaction,
    /// before the next transaction begins. Observers are notified after the
    /// registry lock is released, so they may cancel themselves or others.
    pub fn report_changes(&self, changes: &Region, snapshot: &Arc<TableCache>) {
        if changes.is_empty() {
            return;
        }
        // Dead observers are dropped once the lock is released.
        let mut dead = Vec::new();
        let dirty: Vec<Arc<dyn TransactionObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|_, observer| {
                let live = observer.is_live();
                if !live {
                    dead.push(Arc::clone(observer));
                }
                live
            });
            observers
                .values()
                .filter(|observer| observer.observes(changes))
                .cloned()
                .collect()
        };
        drop(dead);
        trace!(changes = %changes, dirty = dirty.len(), "changes reported");
        for observer in dirty {
            if observer.is_live() {
                observer.database_did_change(Arc::clone(snapshot));
            }
        }
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("observers", &self.observer_count())
            .finish()
    }
}
