//! Vigil Reactive - Value observations for Vigil databases.
//!
//! This crate lets applications observe values computed from a database:
//! an observation delivers its initial value, then a new value after each
//! committed transaction that could have changed it.
//!
//! # Core Concepts
//!
//! - `ValueObservation`: How to compute an observed value
//! - `ValueReducer`: Fetches from a snapshot and decides what to deliver
//! - `ChangeTracker`: Routes committed transactions to the observers whose
//!   region they modified
//! - `DatabaseCancellable`: Stops an observation, explicitly or when dropped
//! - `Scheduling`: Immediate delivery, or deferred evaluation on a
//!   `WorkerPool` and delivery on a `DispatchQueue`
//! - `DatabaseWriter`: What a database provides to observations
//!
//! # Example
//!
//! ```ignore
//! use vigil_reactive::{Scheduling, ValueObservation};
//! use vigil_storage::Query;
//!
//! let observation = ValueObservation::tracking(|db| db.fetch_all(&Query::select("player")));
//! let cancellable = observation.start(&db, Scheduling::Deferred, |error| {
//!     eprintln!("observation failed: {}", error);
//! }, |players| {
//!     println!("{} players", players.len());
//! });
//!
//! // Later
//! cancellable.cancel();
//! ```

pub mod cancellable;
pub mod change_tracker;
pub mod error;
pub mod observation;
mod observer;
pub mod reducer;
pub mod scheduling;
pub mod writer;

pub use cancellable::{CancelFlag, DatabaseCancellable};
pub use change_tracker::{ChangeTracker, ObserverId, TransactionObserver};
pub use error::{ObservationError, ObservationErrorKind, ReducerPanic};
pub use observation::{RegionSource, ValueIterator, ValueObservation};
pub use reducer::{AnyValueReducer, Map, RemoveDuplicates, ValueReducer};
pub use scheduling::{DispatchQueue, Scheduling, WorkerPool};
pub use writer::DatabaseWriter;
