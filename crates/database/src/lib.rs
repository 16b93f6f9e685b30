//! Vigil Database - In-memory databases with value observation.
//!
//! This crate provides the two database flavors observations run against:
//!
//! - `DatabaseQueue`: Serializes reads and writes through a single writer
//! - `DatabasePool`: Serializes writes, and reads committed snapshots
//!   concurrently
//!
//! Both implement [`DatabaseWriter`], and notify their observers after each
//! committed transaction.
//!
//! # Example
//!
//! ```rust
//! use vigil_core::schema::TableBuilder;
//! use vigil_core::DataType;
//! use vigil_database::{DatabaseQueue, DatabaseWriter, Scheduling, ValueObservation};
//! use vigil_storage::Query;
//!
//! let db = DatabaseQueue::new().unwrap();
//! db.write(|db| {
//!     let schema = TableBuilder::new("player")?
//!         .add_rowid_column("id")?
//!         .add_column("name", DataType::Text)?
//!         .build()?;
//!     db.create_table(schema)
//! })
//! .unwrap();
//!
//! let (sender, receiver) = std::sync::mpsc::channel();
//! let observation = ValueObservation::tracking(|db| db.fetch_count(&Query::select("player")));
//! let cancellable = observation.start(&db, Scheduling::Immediate, |_| {}, move |count| {
//!     sender.send(count).unwrap();
//! });
//! db.write(|db| db.insert("player", &[("name", "Arthur".into())])).unwrap();
//!
//! assert_eq!(receiver.recv().unwrap(), 0);
//! assert_eq!(receiver.recv().unwrap(), 1);
//! cancellable.cancel();
//! ```

pub mod config;
mod engine;

use std::fmt;
use std::sync::Arc;

use vigil_core::Result;
use vigil_reactive::{ChangeTracker, DispatchQueue, WorkerPool};
use vigil_storage::{Connection, Snapshot, TableCache};

use crate::engine::{Engine, ReadMode};

pub use config::{Configuration, DefaultScheduling};
pub use vigil_reactive::{
    DatabaseCancellable, DatabaseWriter, ObservationError, ObservationErrorKind, Scheduling,
    ValueIterator, ValueObservation,
};

/// A database that serializes all accesses.
///
/// Reads wait for writes, and a read from inside a write fails with
/// `Error::Reentrancy`. Deferred observations evaluate on a single worker.
#[derive(Clone)]
pub struct DatabaseQueue {
    engine: Arc<Engine>,
}

impl DatabaseQueue {
    /// Opens an empty database with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_configuration(Configuration::default())
    }

    pub fn with_configuration(configuration: Configuration) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(Engine::new(ReadMode::Serialized, configuration)?),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        self.engine.configuration()
    }
}

/// A database whose readers never wait for the writer.
///
/// Reads see the last committed transaction. Deferred observations evaluate
/// on up to `maximum_reader_count` workers.
#[derive(Clone)]
pub struct DatabasePool {
    engine: Arc<Engine>,
}

impl DatabasePool {
    /// Opens an empty database with the default configuration.
    pub fn new() -> Result<Self> {
        Self::with_configuration(Configuration::default())
    }

    pub fn with_configuration(configuration: Configuration) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(Engine::new(ReadMode::Concurrent, configuration)?),
        })
    }

    pub fn configuration(&self) -> &Configuration {
        self.engine.configuration()
    }
}

macro_rules! impl_database_writer {
    ($ty:ty) => {
        impl DatabaseWriter for $ty {
            fn write<T, F>(&self, body: F) -> Result<T>
            where
                F: FnOnce(&mut Connection<'_>) -> Result<T>,
            {
                self.engine.write(body)
            }

            fn read<T, F>(&self, body: F) -> Result<T>
            where
                F: FnOnce(&Snapshot) -> Result<T>,
            {
                self.engine.read(body)
            }

            fn with_writer_state<T, F>(&self, body: F) -> Result<T>
            where
                F: FnOnce(&Arc<TableCache>) -> T,
            {
                self.engine.with_writer_state(body)
            }

            fn change_tracker(&self) -> &Arc<ChangeTracker> {
                self.engine.tracker()
            }

            fn worker_pool(&self) -> &WorkerPool {
                self.engine.pool()
            }

            fn delivery_queue(&self) -> &DispatchQueue {
                self.engine.queue()
            }

            fn default_scheduling(&self) -> Scheduling {
                self.engine.configuration().get_default_scheduling().into()
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("label", &self.engine.configuration().get_label())
                    .field("observers", &self.engine.tracker().observer_count())
                    .finish()
            }
        }
    };
}

impl_database_writer!(DatabaseQueue);
impl_database_writer!(DatabasePool);
