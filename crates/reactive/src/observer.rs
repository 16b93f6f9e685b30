//! Value observers.
//!
//! A `ValueObserver` is what a started observation registers with the
//! change tracker. It owns the reducer and the application callbacks, and
//! shares only the cancel flag with the `DatabaseCancellable` returned to the
//! application.
//!
//! An observer runs at most one evaluation at a time. Changes that arrive
//! while an evaluation is in flight are coalesced: one more evaluation runs
//! afterwards, against the most recent committed state. An observer is
//! created busy, so that changes committed while it starts wait until its
//! initial value is delivered.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use vigil_core::{Error, Region, Result};
use vigil_storage::{Snapshot, TableCache};

use crate::cancellable::CancelFlag;
use crate::change_tracker::{ChangeTracker, ObserverId, TransactionObserver};
use crate::error::{ObservationError, ReducerPanic};
use crate::reducer::ValueReducer;
use crate::scheduling::{DispatchQueue, WorkerPool};

pub(crate) type ChangeCallback<V> = Box<dyn FnMut(V) + Send>;
pub(crate) type ErrorCallback = Box<dyn FnOnce(ObservationError) + Send>;

/// Application callbacks behind the delivery gate.
pub(crate) struct Callbacks<V> {
    cancel: CancelFlag,
    on_change: Mutex<ChangeCallback<V>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl<V> Callbacks<V> {
    pub(crate) fn new(cancel: CancelFlag, on_error: ErrorCallback, on_change: ChangeCallback<V>) -> Self {
        Self {
            cancel,
            on_change: Mutex::new(on_change),
            on_error: Mutex::new(Some(on_error)),
        }
    }

    pub(crate) fn deliver(&self, value: V) {
        self.cancel
            .run_unless_cancelled(|| (self.on_change.lock())(value));
    }

    pub(crate) fn fail(&self, error: ObservationError) {
        self.cancel.run_unless_cancelled(|| {
            let on_error = self.on_error.lock().take();
            if let Some(on_error) = on_error {
                on_error(error);
            }
        });
    }
}

/// Where an observer evaluates and delivers.
pub(crate) enum Delivery {
    Immediate,
    Deferred { pool: WorkerPool, queue: DispatchQueue },
}

/// How an observer knows its region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegionTracking {
    /// The region is recorded from what each fetch reads.
    Recorded,
    /// The region is fixed when the observation starts.
    Constant,
}

struct Pending {
    snapshot: Option<Arc<TableCache>>,
    /// An evaluation is running, or the observer is starting.
    running: bool,
}

/// Clears the pending state if an evaluation unwinds.
struct RunningGuard<'a> {
    pending: &'a Mutex<Pending>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut pending = self.pending.lock();
            pending.snapshot = None;
            pending.running = false;
        }
    }
}

/// Runs one reducer step, turning a panic into an error.
fn catch_panic<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => Err(Error::custom(ReducerPanic::from_payload(payload))),
    }
}

pub(crate) struct ValueObserver<R: ValueReducer> {
    id: ObserverId,
    tracker: Weak<ChangeTracker>,
    cancel: CancelFlag,
    completed: AtomicBool,
    tracking: RegionTracking,
    region: Arc<Mutex<Region>>,
    reducer: Mutex<R>,
    pending: Mutex<Pending>,
    delivery: Delivery,
    callbacks: Arc<Callbacks<R::Value>>,
}

impl<R: ValueReducer> ValueObserver<R> {
    pub(crate) fn new(
        id: ObserverId,
        tracker: Weak<ChangeTracker>,
        reducer: R,
        tracking: RegionTracking,
        delivery: Delivery,
        callbacks: Callbacks<R::Value>,
    ) -> Self {
        Self {
            id,
            tracker,
            cancel: callbacks.cancel.clone(),
            completed: AtomicBool::new(false),
            tracking,
            region: Arc::new(Mutex::new(Region::empty())),
            reducer: Mutex::new(reducer),
            pending: Mutex::new(Pending {
                snapshot: None,
                running: true,
            }),
            delivery,
            callbacks: Arc::new(callbacks),
        }
    }

    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    /// Returns the region shared with the cancellable.
    pub(crate) fn shared_region(&self) -> Arc<Mutex<Region>> {
        Arc::clone(&self.region)
    }

    pub(crate) fn set_region(&self, region: Region) {
        *self.region.lock() = region;
    }

    fn live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.completed.load(Ordering::Acquire)
    }

    /// Fetches and reduces one committed state.
    pub(crate) fn evaluate(
        &self,
        state: Arc<TableCache>,
    ) -> std::result::Result<Option<R::Value>, ObservationError> {
        let snapshot = Snapshot::new(state);
        let mut reducer = self.reducer.lock();
        let fetched = catch_panic(|| reducer.fetch(&snapshot)).map_err(ObservationError::fetch)?;
        if self.tracking == RegionTracking::Recorded {
            self.set_region(snapshot.take_recorded_region());
        }
        catch_panic(|| reducer.reduce(fetched)).map_err(ObservationError::reduce)
    }

    /// Hands a value to the application, per delivery policy.
    pub(crate) fn deliver(&self, value: R::Value) {
        match &self.delivery {
            Delivery::Immediate => self.callbacks.deliver(value),
            Delivery::Deferred { queue, .. } => {
                let callbacks = Arc::clone(&self.callbacks);
                queue.dispatch(move || callbacks.deliver(value));
            }
        }
    }

    /// Ends the observation with an error. Only the first failure is
    /// reported.
    pub(crate) fn fail(&self, error: ObservationError) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(observer = self.id, error = %error, "observation failed");
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.remove(self.id);
        }
        match &self.delivery {
            Delivery::Immediate => self.callbacks.fail(error),
            Delivery::Deferred { queue, .. } => {
                let callbacks = Arc::clone(&self.callbacks);
                queue.dispatch(move || callbacks.fail(error));
            }
        }
    }

    fn evaluate_and_deliver(&self, state: Arc<TableCache>) {
        match self.evaluate(state) {
            Ok(Some(value)) => self.deliver(value),
            Ok(None) => trace!(observer = self.id, "no new value"),
            Err(error) => self.fail(error),
        }
    }

    /// Ends the start phase, once the initial value is delivered.
    ///
    /// Changes committed since registration are evaluated now.
    pub(crate) fn resume(self: &Arc<Self>) {
        match &self.delivery {
            Delivery::Immediate => self.run_pending(),
            Delivery::Deferred { pool, .. } => {
                {
                    let mut pending = self.pending.lock();
                    if pending.snapshot.is_none() {
                        pending.running = false;
                        return;
                    }
                }
                self.spawn_pending(pool);
            }
        }
    }

    /// Evaluates pending states until there are none left.
    fn run_pending(&self) {
        let _guard = RunningGuard {
            pending: &self.pending,
        };
        loop {
            let state = {
                let mut pending = self.pending.lock();
                match pending.snapshot.take() {
                    Some(state) if self.live() => state,
                    _ => {
                        pending.snapshot = None;
                        pending.running = false;
                        return;
                    }
                }
            };
            self.evaluate_and_deliver(state);
        }
    }

    fn spawn_pending(self: &Arc<Self>, pool: &WorkerPool) {
        let observer = Arc::clone(self);
        if pool.execute(move || observer.run_pending()).is_err() {
            debug!(observer = self.id, "worker pool closed, evaluation skipped");
            let mut pending = self.pending.lock();
            pending.snapshot = None;
            pending.running = false;
        }
    }
}

impl<R: ValueReducer> TransactionObserver for ValueObserver<R> {
    fn observes(&self, changes: &Region) -> bool {
        // A recorded region is stale while an evaluation is in flight.
        if self.tracking == RegionTracking::Recorded && self.pending.lock().running {
            return !changes.is_empty();
        }
        self.region.lock().is_modified_by(changes)
    }

    fn database_did_change(self: Arc<Self>, snapshot: Arc<TableCache>) {
        if !self.live() {
            return;
        }
        {
            let mut pending = self.pending.lock();
            pending.snapshot = Some(snapshot);
            if pending.running {
                trace!(observer = self.id, "evaluation coalesced");
                return;
            }
            pending.running = true;
        }
        match &self.delivery {
            Delivery::Immediate => self.run_pending(),
            Delivery::Deferred { pool, .. } => self.spawn_pending(pool),
        }
    }

    fn is_live(&self) -> bool {
        self.live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::AnyValueReducer;
    use std::time::Duration;
    use vigil_core::schema::TableBuilder;
    use vigil_core::{DataType, Error, Result};
    use vigil_storage::{Connection, Query};

    fn state(rows: usize) -> Arc<TableCache> {
        let mut cache = TableCache::new();
        let mut conn = Connection::begin(&mut cache);
        let schema = TableBuilder::new("t")
            .unwrap()
            .add_rowid_column("id")
            .unwrap()
            .add_column("name", DataType::Text)
            .unwrap()
            .build()
            .unwrap();
        conn.create_table(schema).unwrap();
        for i in 0..rows {
            conn.insert("t", &[("name", format!("row {}", i).into())])
                .unwrap();
        }
        conn.commit().unwrap();
        Arc::new(cache)
    }

    fn count_reducer() -> impl ValueReducer<Value = usize> {
        AnyValueReducer::new(
            |snapshot: &Snapshot| snapshot.fetch_count(&Query::select("t")),
            |count: usize| -> Result<Option<usize>> { Ok(Some(count)) },
        )
    }

    fn immediate<R: ValueReducer>(
        reducer: R,
        on_change: impl FnMut(R::Value) + Send + 'static,
    ) -> (Arc<ValueObserver<R>>, crossbeam_channel::Receiver<ObservationError>) {
        let (sender, errors) = crossbeam_channel::unbounded();
        let callbacks = Callbacks::new(
            CancelFlag::new(),
            Box::new(move |error| {
                let _ = sender.send(error);
            }),
            Box::new(on_change),
        );
        let observer = ValueObserver::new(
            1,
            Weak::new(),
            reducer,
            RegionTracking::Recorded,
            Delivery::Immediate,
            callbacks,
        );
        let observer = Arc::new(observer);
        observer.resume();
        (observer, errors)
    }

    fn deferred<R: ValueReducer>(
        reducer: R,
        on_change: impl FnMut(R::Value) + Send + 'static,
    ) -> (Arc<ValueObserver<R>>, crossbeam_channel::Receiver<ObservationError>) {
        let (sender, errors) = crossbeam_channel::unbounded();
        let callbacks = Callbacks::new(
            CancelFlag::new(),
            Box::new(move |error| {
                let _ = sender.send(error);
            }),
            Box::new(on_change),
        );
        let observer = ValueObserver::new(
            1,
            Weak::new(),
            reducer,
            RegionTracking::Recorded,
            Delivery::Deferred {
                pool: WorkerPool::new("observer-test-pool", 2).unwrap(),
                queue: DispatchQueue::new("observer-test-queue").unwrap(),
            },
            callbacks,
        );
        (Arc::new(observer), errors)
    }

    #[test]
    fn test_evaluate_records_region() {
        let (observer, _) = immediate(count_reducer(), |_| {});
        assert_eq!(observer.evaluate(state(2)).unwrap(), Some(2));
        assert_eq!(observer.shared_region().lock().to_string(), "t(*)");
        assert!(observer.observes(&Region::table("t").with_rowids("t", [9])));
        assert!(!observer.observes(&Region::table("u")));
    }

    #[test]
    fn test_immediate_delivery() {
        let (sender, values) = crossbeam_channel::unbounded();
        let (observer, _) = immediate(count_reducer(), move |count| {
            sender.send(count).unwrap();
        });
        Arc::clone(&observer).database_did_change(state(1));
        Arc::clone(&observer).database_did_change(state(3));
        assert_eq!(values.try_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_cancelled_observer_delivers_nothing() {
        let (sender, values) = crossbeam_channel::unbounded();
        let (observer, _) = immediate(count_reducer(), move |count| {
            sender.send(count).unwrap();
        });
        observer.cancel.cancel();
        assert!(!observer.is_live());
        Arc::clone(&observer).database_did_change(state(1));
        assert!(values.try_recv().is_err());
    }

    #[test]
    fn test_failure_is_reported_once() {
        let reducer = AnyValueReducer::new(
            |_: &Snapshot| -> Result<()> { Err(Error::invalid_operation("boom")) },
            |_: ()| -> Result<Option<()>> { Ok(Some(())) },
        );
        let (observer, errors) = immediate(reducer, |_| {});
        Arc::clone(&observer).database_did_change(state(0));
        Arc::clone(&observer).database_did_change(state(0));
        let error = errors.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(error.kind(), crate::ObservationErrorKind::Fetch);
        assert!(errors.try_recv().is_err());
        assert!(!observer.is_live());
    }

    #[test]
    fn test_deferred_evaluations_deliver_in_order() {
        let (sender, values) = crossbeam_channel::unbounded();
        let (observer, _) = deferred(count_reducer(), move |count| {
            sender.send(count).unwrap();
        });
        observer.resume();
        for rows in 1..=5 {
            Arc::clone(&observer).database_did_change(state(rows));
        }

        // Coalescing may skip intermediate states, never the last one.
        let mut received = Vec::new();
        while received.last() != Some(&5) {
            received.push(values.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        let mut sorted = received.clone();
        sorted.sort_unstable();
        assert_eq!(received, sorted);
    }

    #[test]
    fn test_changes_wait_for_the_start_phase() {
        let (sender, values) = crossbeam_channel::unbounded();
        let callbacks = Callbacks::new(
            CancelFlag::new(),
            Box::new(|_| {}),
            Box::new(move |count| {
                sender.send(count).unwrap();
            }),
        );
        let observer = Arc::new(ValueObserver::new(
            1,
            Weak::new(),
            count_reducer(),
            RegionTracking::Recorded,
            Delivery::Immediate,
            callbacks,
        ));
        let initial = observer.evaluate(state(0)).unwrap().unwrap();
        Arc::clone(&observer).database_did_change(state(1));
        Arc::clone(&observer).database_did_change(state(2));
        assert!(values.try_recv().is_err());

        observer.deliver(initial);
        observer.resume();
        assert_eq!(values.try_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    fn panicking_reducer() -> impl ValueReducer<Value = usize> {
        let mut fetches = 0;
        AnyValueReducer::new(
            move |snapshot: &Snapshot| {
                fetches += 1;
                if fetches > 1 {
                    panic!("fetch {}", fetches);
                }
                snapshot.fetch_count(&Query::select("t"))
            },
            |count: usize| -> Result<Option<usize>> { Ok(Some(count)) },
        )
    }

    #[test]
    fn test_immediate_panic_fails_observation() {
        let (observer, errors) = immediate(panicking_reducer(), |_| {});
        assert_eq!(observer.evaluate(state(0)).unwrap(), Some(0));
        Arc::clone(&observer).database_did_change(state(1));

        let error = errors.try_recv().unwrap();
        assert_eq!(error.kind(), crate::ObservationErrorKind::Fetch);
        assert!(error.database_error().is_custom::<ReducerPanic>());
        assert!(!observer.is_live());
    }

    #[test]
    fn test_deferred_panic_fails_observation() {
        let (sender, values) = crossbeam_channel::unbounded();
        let (observer, errors) = deferred(panicking_reducer(), move |count| {
            sender.send(count).unwrap();
        });
        assert_eq!(observer.evaluate(state(0)).unwrap(), Some(0));
        observer.resume();

        Arc::clone(&observer).database_did_change(state(2));
        let error = errors.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(error.kind(), crate::ObservationErrorKind::Fetch);
        match error.database_error().as_custom() {
            Some(source) => assert_eq!(source.to_string(), "reducer panicked: fetch 2"),
            None => panic!("expected a custom error"),
        }
        assert!(!observer.is_live());

        Arc::clone(&observer).database_did_change(state(3));
        assert!(values.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(errors.try_recv().is_err());
    }
}
