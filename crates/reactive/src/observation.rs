//! Value observations.
//!
//! A `ValueObservation` describes how to compute a value from the database.
//! Starting it against a database delivers the current value, then a new
//! value after each committed transaction that modified what the value was
//! computed from.
//!
//! # Example
//!
//! ```ignore
//! use vigil_reactive::{Scheduling, ValueObservation};
//! use vigil_storage::Query;
//!
//! let observation = ValueObservation::tracking(|db| db.fetch_count(&Query::select("player")));
//! let cancellable = observation.start(
//!     &db,
//!     Scheduling::Immediate,
//!     |error| eprintln!("{}", error),
//!     |count| println!("{} players", count),
//! );
//! ```

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;
use vigil_core::{Region, Result};
use vigil_storage::{Query, Snapshot, TableCache};

use crate::cancellable::{CancelFlag, DatabaseCancellable};
use crate::error::ObservationError;
use crate::observer::{Callbacks, Delivery, RegionTracking, ValueObserver};
use crate::reducer::{Map, RemoveDuplicates, ValueReducer};
use crate::scheduling::Scheduling;
use crate::writer::DatabaseWriter;

/// Part of an explicitly declared observed region.
#[derive(Clone, Debug, PartialEq)]
pub enum RegionSource {
    /// A literal region.
    Region(Region),
    /// The declared region of a query, resolved when the observation starts.
    Query(Query),
}

impl From<Region> for RegionSource {
    fn from(region: Region) -> Self {
        RegionSource::Region(region)
    }
}

impl From<Query> for RegionSource {
    fn from(query: Query) -> Self {
        RegionSource::Query(query)
    }
}

#[derive(Clone, Debug)]
enum ObservedRegion {
    /// Learn the region from each fetch.
    Recorded,
    Declared(Vec<RegionSource>),
}

impl ObservedRegion {
    fn resolve(&self, state: &TableCache) -> Result<Option<Region>> {
        let sources = match self {
            ObservedRegion::Recorded => return Ok(None),
            ObservedRegion::Declared(sources) => sources,
        };
        let mut region = Region::empty();
        for source in sources {
            match source {
                RegionSource::Region(literal) => region.form_union(literal),
                RegionSource::Query(query) => region.form_union(&query.region(state)?),
            }
        }
        Ok(Some(region))
    }
}

/// Describes an observed value.
pub struct ValueObservation<R: ValueReducer> {
    make_reducer: Arc<dyn Fn() -> R + Send + Sync>,
    region: ObservedRegion,
}

impl<R: ValueReducer> Clone for ValueObservation<R> {
    fn clone(&self) -> Self {
        Self {
            make_reducer: Arc::clone(&self.make_reducer),
            region: self.region.clone(),
        }
    }
}

impl<T> ValueObservation<RemoveDuplicates<T>>
where
    T: PartialEq + Clone + Send + 'static,
{
    /// Observes the values returned by `fetch`.
    ///
    /// The observation tracks the region `fetch` reads, and does not notify
    /// consecutive equal values.
    pub fn tracking<F>(fetch: F) -> Self
    where
        F: Fn(&Snapshot) -> Result<T> + Send + Sync + 'static,
    {
        let fetch: Arc<dyn Fn(&Snapshot) -> Result<T> + Send + Sync> = Arc::new(fetch);
        Self {
            make_reducer: Arc::new(move || RemoveDuplicates::new(Arc::clone(&fetch))),
            region: ObservedRegion::Recorded,
        }
    }

    /// Observes the values returned by `fetch`, after each transaction that
    /// modifies the given region.
    ///
    /// Queries are resolved to their declared region when the observation
    /// starts. A query on an unknown table or column fails the observation.
    pub fn tracking_region<I, S, F>(regions: I, fetch: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RegionSource>,
        F: Fn(&Snapshot) -> Result<T> + Send + Sync + 'static,
    {
        let mut observation = Self::tracking(fetch);
        observation.region = ObservedRegion::Declared(regions.into_iter().map(Into::into).collect());
        observation
    }
}

impl<R: ValueReducer> ValueObservation<R> {
    /// Observes with a custom reducer. `make_reducer` is called once per
    /// `start`.
    ///
    /// The region is recorded from what the reducer fetches.
    pub fn new<M>(make_reducer: M) -> Self
    where
        M: Fn() -> R + Send + Sync + 'static,
    {
        Self {
            make_reducer: Arc::new(make_reducer),
            region: ObservedRegion::Recorded,
        }
    }

    /// Transforms delivered values.
    pub fn map<U, F>(self, transform: F) -> ValueObservation<Map<R, U>>
    where
        U: Send + 'static,
        F: Fn(R::Value) -> U + Send + Sync + 'static,
    {
        let transform: Arc<dyn Fn(R::Value) -> U + Send + Sync> = Arc::new(transform);
        let make_reducer = self.make_reducer;
        ValueObservation {
            make_reducer: Arc::new(move || Map::new(make_reducer(), Arc::clone(&transform))),
            region: self.region,
        }
    }

    /// Starts observing the database.
    ///
    /// The initial value is fetched before this method returns. With
    /// `Scheduling::Immediate` it is also delivered before this method
    /// returns; otherwise it is delivered before any value that follows a
    /// later transaction. The initial delivery runs without holding the
    /// writer, so `on_change` may write to the database.
    ///
    /// `on_error` is called at most once, after which the observation
    /// delivers nothing.
    pub fn start<D, E, C>(&self, db: &D, scheduling: Scheduling, on_error: E, on_change: C) -> DatabaseCancellable
    where
        D: DatabaseWriter,
        E: FnOnce(ObservationError) + Send + 'static,
        C: FnMut(R::Value) + Send + 'static,
    {
        let tracker = db.change_tracker();
        let flag = CancelFlag::new();
        let callbacks = Callbacks::new(flag.clone(), Box::new(on_error), Box::new(on_change));
        let delivery = match scheduling {
            Scheduling::Immediate => Delivery::Immediate,
            Scheduling::Deferred => Delivery::Deferred {
                pool: db.worker_pool().clone(),
                queue: db.delivery_queue().clone(),
            },
            Scheduling::DeferredOn(queue) => Delivery::Deferred {
                pool: db.worker_pool().clone(),
                queue,
            },
        };
        let tracking = match self.region {
            ObservedRegion::Recorded => RegionTracking::Recorded,
            ObservedRegion::Declared(_) => RegionTracking::Constant,
        };
        let observer = Arc::new(ValueObserver::new(
            tracker.next_observer_id(),
            Arc::downgrade(tracker),
            (self.make_reducer)(),
            tracking,
            delivery,
            callbacks,
        ));
        let cancellable = DatabaseCancellable::new(
            Some(observer.id()),
            flag,
            Arc::downgrade(tracker),
            observer.shared_region(),
        );

        // No transaction commits between the initial fetch and registration.
        // Changes committed after registration wait for `resume`.
        let started = db.with_writer_state(|state| -> std::result::Result<_, ObservationError> {
            if let Some(region) = self.region.resolve(state).map_err(ObservationError::region)? {
                observer.set_region(region);
            }
            let initial = observer.evaluate(Arc::clone(state))?;
            tracker.register(observer.id(), observer.clone());
            Ok(initial)
        });
        match started {
            Ok(Ok(initial)) => {
                debug!(
                    observer = observer.id(),
                    region = %cancellable.observed_region(),
                    "observation started"
                );
                if let Some(value) = initial {
                    observer.deliver(value);
                }
                observer.resume();
            }
            Ok(Err(error)) => observer.fail(error),
            Err(error) => observer.fail(ObservationError::fetch(error)),
        }
        cancellable
    }

    /// Starts observing with the database default scheduling.
    pub fn observe<D, E, C>(&self, db: &D, on_error: E, on_change: C) -> DatabaseCancellable
    where
        D: DatabaseWriter,
        E: FnOnce(ObservationError) + Send + 'static,
        C: FnMut(R::Value) + Send + 'static,
    {
        self.start(db, db.default_scheduling(), on_error, on_change)
    }

    /// Returns a blocking iterator over the observed values.
    ///
    /// The iterator yields the initial value, then each new value. It ends
    /// after yielding an error. Dropping it cancels the observation.
    pub fn values<D>(&self, db: &D) -> ValueIterator<R::Value>
    where
        D: DatabaseWriter,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let error_sender = sender.clone();
        let cancellable = self.start(
            db,
            Scheduling::Immediate,
            move |error| {
                let _ = error_sender.send(Err(error));
            },
            move |value| {
                let _ = sender.send(Ok(value));
            },
        );
        ValueIterator {
            receiver,
            cancellable,
            done: false,
        }
    }
}

/// Blocking iterator returned by [`ValueObservation::values`].
pub struct ValueIterator<V> {
    receiver: Receiver<std::result::Result<V, ObservationError>>,
    cancellable: DatabaseCancellable,
    done: bool,
}

impl<V> ValueIterator<V> {
    /// Waits at most `timeout` for the next value.
    ///
    /// Returns `None` on timeout, and once the iterator has ended.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<std::result::Result<V, ObservationError>> {
        if self.done {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(self.track(item)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.done = true;
                None
            }
        }
    }

    /// Returns the cancellable of the underlying observation.
    pub fn cancellable(&self) -> &DatabaseCancellable {
        &self.cancellable
    }

    fn track(
        &mut self,
        item: std::result::Result<V, ObservationError>,
    ) -> std::result::Result<V, ObservationError> {
        if item.is_err() {
            self.done = true;
        }
        item
    }
}

impl<V> Iterator for ValueIterator<V> {
    type Item = std::result::Result<V, ObservationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.receiver.recv() {
            Ok(item) => Some(self.track(item)),
            Err(_) => {
                self.done = true;
                None
            }
        }
    }
}
