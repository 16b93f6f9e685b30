//! The writer shared by queues and pools.
//!
//! One thread at a time holds the writer. A write runs on a private copy of
//! the committed state when readers still hold it, so snapshots never see
//! uncommitted changes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace, warn};
use vigil_core::{Error, Result};
use vigil_reactive::{ChangeTracker, DispatchQueue, WorkerPool};
use vigil_storage::{Connection, Snapshot, TableCache};

use crate::config::Configuration;

/// How reads reach the committed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// Reads go through the writer.
    Serialized,
    /// Reads use the last published state and never wait for the writer.
    Concurrent,
}

pub(crate) struct Engine {
    mode: ReadMode,
    configuration: Configuration,
    writer: Mutex<Arc<TableCache>>,
    /// Thread currently holding the writer.
    writer_thread: Mutex<Option<ThreadId>>,
    published: RwLock<Arc<TableCache>>,
    tracker: Arc<ChangeTracker>,
    pool: WorkerPool,
    queue: DispatchQueue,
}

/// Holds the writer, and marks the current thread as the writer thread
/// until dropped.
struct WriterGuard<'a> {
    engine: &'a Engine,
    state: MutexGuard<'a, Arc<TableCache>>,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.engine.writer_thread.lock() = None;
    }
}

impl Engine {
    pub(crate) fn new(mode: ReadMode, configuration: Configuration) -> Result<Self> {
        let workers = match mode {
            ReadMode::Serialized => 1,
            ReadMode::Concurrent => configuration.get_maximum_reader_count(),
        };
        let label = configuration.get_label();
        let pool = WorkerPool::new(format!("{}.reader", label), workers)?;
        let queue = DispatchQueue::new(format!("{}.delivery", label))?;
        let state = Arc::new(TableCache::new());
        debug!(label, ?mode, workers, "database opened");
        Ok(Self {
            mode,
            writer: Mutex::new(Arc::clone(&state)),
            writer_thread: Mutex::new(None),
            published: RwLock::new(state),
            tracker: Arc::new(ChangeTracker::new()),
            pool,
            queue,
            configuration,
        })
    }

    pub(crate) fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub(crate) fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.tracker
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    fn lock_writer(&self) -> Result<WriterGuard<'_>> {
        let current = thread::current().id();
        if *self.writer_thread.lock() == Some(current) {
            return Err(Error::Reentrancy);
        }
        let state = self.writer.lock();
        *self.writer_thread.lock() = Some(current);
        Ok(WriterGuard { engine: self, state })
    }

    pub(crate) fn write<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut Connection<'_>) -> Result<T>,
    {
        let mut guard = self.lock_writer()?;
        let mut connection = Connection::begin(Arc::make_mut(&mut guard.state));
        let value = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut connection))) {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                connection.rollback()?;
                return Err(error);
            }
            Err(payload) => {
                // The writer is released by the unwind; leave it clean.
                if let Err(error) = connection.rollback() {
                    warn!(%error, "rollback after panic failed");
                }
                panic::resume_unwind(payload);
            }
        };
        let changes = connection.commit()?;
        if changes.is_empty() {
            trace!("empty transaction");
            return Ok(value);
        }

        let committed = Arc::clone(&guard.state);
        if self.mode == ReadMode::Concurrent {
            *self.published.write() = Arc::clone(&committed);
        }
        // Observers are notified before the writer is released.
        self.tracker.report_changes(&changes, &committed);
        drop(guard);
        Ok(value)
    }

    pub(crate) fn read<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Snapshot) -> Result<T>,
    {
        let state = match self.mode {
            ReadMode::Serialized => {
                let guard = self.lock_writer()?;
                let state = Arc::clone(&guard.state);
                drop(guard);
                state
            }
            ReadMode::Concurrent => Arc::clone(&self.published.read()),
        };
        body(&Snapshot::new(state))
    }

    pub(crate) fn with_writer_state<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Arc<TableCache>) -> T,
    {
        let guard = self.lock_writer()?;
        Ok(body(&guard.state))
    }
}
