//! The database side of observations.

use std::sync::Arc;

use vigil_core::{Region, Result};
use vigil_storage::{Connection, Query, Snapshot, TableCache};

use crate::change_tracker::ChangeTracker;
use crate::scheduling::{DispatchQueue, Scheduling, WorkerPool};

/// A database observations can run against.
///
/// Implementations serialize writes through a single writer. After each
/// transaction commits, and before the writer is released, they call
/// [`ChangeTracker::report_changes`] on their tracker with the changed region
/// and the committed state.
pub trait DatabaseWriter: Send + Sync {
    /// Runs `body` in a write transaction.
    ///
    /// The transaction commits if `body` succeeds and rolls back otherwise.
    /// Calling `write` from the writer thread while it performs a write, or
    /// notifies observers, fails with `Error::Reentrancy`.
    fn write<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Connection<'_>) -> Result<T>;

    /// Runs `body` on a snapshot of the last committed state.
    fn read<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Snapshot) -> Result<T>;

    /// Returns the declared region of a query.
    fn region(&self, query: &Query) -> Result<Region> {
        self.read(|snapshot| snapshot.region(query))
    }

    /// Runs `body` with the last committed state while holding the writer,
    /// so that no transaction can commit until `body` returns.
    fn with_writer_state<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Arc<TableCache>) -> T;

    /// Returns the tracker notified of every committed transaction.
    fn change_tracker(&self) -> &Arc<ChangeTracker>;

    /// Returns the pool deferred observations evaluate on.
    fn worker_pool(&self) -> &WorkerPool;

    /// Returns the queue deferred observations deliver on by default.
    fn delivery_queue(&self) -> &DispatchQueue;

    /// Returns the scheduling of observations started without one.
    fn default_scheduling(&self) -> Scheduling {
        Scheduling::Deferred
    }
}
