//! Value observation against both database flavors.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use vigil_core::schema::{TableBuilder, View};
use vigil_core::{DataType, Error, Region, Result};
use vigil_database::{
    Configuration, DatabaseCancellable, DatabasePool, DatabaseQueue, DatabaseWriter, DefaultScheduling,
    ObservationError, ObservationErrorKind, Scheduling, ValueObservation,
};
use vigil_reactive::{AnyValueReducer, DispatchQueue, ReducerPanic};
use vigil_storage::{Query, Snapshot};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

fn setup<D: DatabaseWriter>(db: D) -> D {
    db.write(|db| {
        let t = TableBuilder::new("t")?
            .add_rowid_column("id")?
            .add_column("name", DataType::Text)?
            .build()?;
        db.create_table(t)?;
        let u = TableBuilder::new("u")?.add_column("score", DataType::Integer)?.build()?;
        db.create_table(u)?;
        db.create_view(View::new("v", "t")?)
    })
    .unwrap();
    db
}

fn queue() -> DatabaseQueue {
    setup(DatabaseQueue::new().unwrap())
}

fn pool() -> DatabasePool {
    setup(DatabasePool::with_configuration(Configuration::default().label("pool").maximum_reader_count(2)).unwrap())
}

fn insert<D: DatabaseWriter>(db: &D, name: &str) -> u64 {
    db.write(|db| db.insert("t", &[("name", name.into())])).unwrap()
}

fn count_t(db: &Snapshot) -> Result<usize> {
    db.fetch_count(&Query::select("t"))
}

type Channels<V> = (Receiver<V>, Receiver<ObservationError>);

fn start<D, R>(
    db: &D,
    observation: &ValueObservation<R>,
    scheduling: Scheduling,
) -> (vigil_database::DatabaseCancellable, Channels<R::Value>)
where
    D: DatabaseWriter,
    R: vigil_reactive::ValueReducer,
{
    let (value_sender, values) = unbounded();
    let (error_sender, errors) = unbounded();
    let cancellable = observation.start(
        db,
        scheduling,
        move |error| {
            let _ = error_sender.send(error);
        },
        move |value| {
            let _ = value_sender.send(value);
        },
    );
    (cancellable, (values, errors))
}

fn schedulings() -> [Scheduling; 2] {
    [Scheduling::Immediate, Scheduling::Deferred]
}

/// Waits until every job dispatched on `queue` so far has run.
fn drain(queue: &DispatchQueue) {
    let (sender, done) = bounded(1);
    queue.dispatch(move || {
        let _ = sender.send(());
    });
    done.recv_timeout(TIMEOUT).unwrap();
}

fn check_immediate_error<D: DatabaseWriter>(db: D) {
    let observation = ValueObservation::tracking(|db| db.fetch_count(&Query::select("missing")));
    let (_cancellable, (values, errors)) = start(&db, &observation, Scheduling::Immediate);

    // Delivered before start returns.
    let error = errors.try_recv().unwrap();
    assert_eq!(error.kind(), ObservationErrorKind::Fetch);
    assert!(matches!(error.database_error(), Error::TableNotFound { .. }));
    assert!(values.try_recv().is_err());
    assert_eq!(db.change_tracker().observer_count(), 0);
}

#[test]
fn test_immediate_error() {
    check_immediate_error(queue());
    check_immediate_error(pool());
}

fn check_error_is_terminal<D: DatabaseWriter>(db: D, scheduling: Scheduling) {
    let observation = ValueObservation::new(|| {
        let mut evaluations = 0;
        AnyValueReducer::new(
            |db: &Snapshot| count_t(db),
            move |count: usize| -> Result<Option<usize>> {
                evaluations += 1;
                if evaluations > 1 {
                    return Err(Error::invalid_operation("second evaluation"));
                }
                Ok(Some(count))
            },
        )
    });
    let (cancellable, (values, errors)) = start(&db, &observation, scheduling);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    let error = errors.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(error.kind(), ObservationErrorKind::Reduce);
    assert_eq!(db.change_tracker().observer_count(), 0);

    insert(&db, "b");
    insert(&db, "c");
    assert!(errors.recv_timeout(QUIET).is_err());
    assert!(values.try_recv().is_err());
    drop(cancellable);
}

#[test]
fn test_error_is_terminal() {
    for scheduling in schedulings() {
        check_error_is_terminal(queue(), scheduling.clone());
        check_error_is_terminal(pool(), scheduling);
    }
}

fn check_view_optimization<D: DatabaseWriter>(db: D) {
    let query = Query::select("v");
    assert_eq!(db.region(&query).unwrap().to_string(), "t(id,name),v(id,name)");

    let fetched = query.clone();
    let observation = ValueObservation::tracking(move |db| {
        let names = db
            .fetch_all(&fetched)?
            .into_iter()
            .map(|row| row.values().to_vec())
            .collect::<Vec<_>>();
        Ok(names)
    });
    let (cancellable, (values, _errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(cancellable.observed_region().to_string(), "t(id,name)");
    assert!(values.try_recv().unwrap().is_empty());

    let id = insert(&db, "a");
    assert_eq!(values.try_recv().unwrap().len(), 1);

    db.write(|db| db.update("t", id, &[("name", "b".into())])).unwrap();
    assert_eq!(values.try_recv().unwrap().len(), 1);

    db.write(|db| db.insert("u", &[("score", 1.into())])).unwrap();
    assert!(values.try_recv().is_err());
}

#[test]
fn test_view_optimization() {
    check_view_optimization(queue());
    check_view_optimization(pool());
}

fn check_cancellable_lifetime<D: DatabaseWriter>(db: D, scheduling: Scheduling) {
    let observation = ValueObservation::tracking(count_t);
    let (cancellable, (values, _errors)) = start(&db, &observation, scheduling);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);
    assert_eq!(db.change_tracker().observer_count(), 1);

    drop(cancellable);
    assert_eq!(db.change_tracker().observer_count(), 0);
    insert(&db, "a");
    assert!(values.recv_timeout(QUIET).is_err());
}

#[test]
fn test_cancellable_lifetime() {
    for scheduling in schedulings() {
        check_cancellable_lifetime(queue(), scheduling.clone());
        check_cancellable_lifetime(pool(), scheduling);
    }
}

fn check_explicit_cancel<D: DatabaseWriter>(db: D) {
    let observation = ValueObservation::tracking(count_t);
    let (cancellable, (values, errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), 0);

    cancellable.cancel();
    cancellable.cancel();
    assert!(cancellable.is_cancelled());
    assert_eq!(db.change_tracker().observer_count(), 0);

    insert(&db, "a");
    assert!(values.try_recv().is_err());
    assert!(errors.try_recv().is_err());
}

#[test]
fn test_explicit_cancel() {
    check_explicit_cancel(queue());
    check_explicit_cancel(pool());
}

fn check_count_changes<D: DatabaseWriter>(db: D, scheduling: Scheduling) {
    let observation = ValueObservation::tracking(count_t);
    let (cancellable, (values, _errors)) = start(&db, &observation, scheduling);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 1);
    insert(&db, "b");
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 2);

    cancellable.cancel();
    insert(&db, "c");
    assert!(values.recv_timeout(QUIET).is_err());
}

#[test]
fn test_count_changes() {
    for scheduling in schedulings() {
        check_count_changes(queue(), scheduling.clone());
        check_count_changes(pool(), scheduling);
    }
}

fn check_no_redundant_delivery<D: DatabaseWriter>(db: D) {
    let id = insert(&db, "a");
    let observation = ValueObservation::tracking(count_t);
    let (_cancellable, (values, _errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), 1);

    // Modifies the observed region without changing the count.
    db.write(|db| db.update("t", id, &[("name", "b".into())])).unwrap();
    assert!(values.try_recv().is_err());

    // An empty transaction notifies nobody.
    db.write(|_| Ok(())).unwrap();
    assert!(values.try_recv().is_err());

    db.write(|db| db.delete("t", id)).unwrap();
    assert_eq!(values.try_recv().unwrap(), 0);
}

#[test]
fn test_no_redundant_delivery() {
    check_no_redundant_delivery(queue());
    check_no_redundant_delivery(pool());
}

fn check_rolled_back_write<D: DatabaseWriter>(db: D) {
    let observation = ValueObservation::tracking(count_t);
    let (_cancellable, (values, _errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), 0);

    let result: Result<()> = db.write(|db| {
        db.insert("t", &[("name", "a".into())])?;
        Err(Error::invalid_operation("abort"))
    });
    assert!(result.is_err());
    assert!(values.try_recv().is_err());
    assert_eq!(db.read(count_t).unwrap(), 0);
}

#[test]
fn test_rolled_back_write() {
    check_rolled_back_write(queue());
    check_rolled_back_write(pool());
}

fn check_deferred_initial_value<D: DatabaseWriter>(db: D) {
    let delivery = db.delivery_queue().clone();
    let observation = ValueObservation::tracking(count_t);
    let (sender, values) = unbounded();
    let _cancellable = observation.start(&db, Scheduling::Deferred, |_| {}, move |count| {
        let _ = sender.send((count, delivery.is_current()));
    });
    insert(&db, "a");

    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), (0, true));
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), (1, true));
}

#[test]
fn test_deferred_initial_value() {
    check_deferred_initial_value(queue());
    check_deferred_initial_value(pool());
}

#[test]
fn test_deferred_on_custom_queue() {
    let db = pool();
    let custom = vigil_database::Scheduling::DeferredOn(vigil_reactive::DispatchQueue::new("custom").unwrap());
    let (_cancellable, (values, _errors)) = start(&db, &ValueObservation::tracking(count_t), custom);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);
    insert(&db, "a");
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 1);
}

fn check_reentrancy<D: DatabaseWriter + Clone + 'static>(db: D) {
    let writer = db.clone();
    let (sender, results) = unbounded();
    let observation = ValueObservation::tracking(count_t);
    let cancellable = observation.start(&db, Scheduling::Immediate, |_| {}, move |_| {
        let _ = sender.send(writer.write(|db| db.insert("u", &[("score", 1.into())])));
    });
    // The initial value is delivered outside of the writer.
    assert!(results.try_recv().unwrap().is_ok());
    assert!(results.try_recv().is_err());

    // Later values are delivered inside the commit.
    insert(&db, "a");
    assert!(matches!(results.try_recv().unwrap(), Err(Error::Reentrancy)));
    assert_eq!(db.read(count_t).unwrap(), 1);
    assert_eq!(db.read(|db| db.fetch_count(&Query::select("u"))).unwrap(), 1);
    cancellable.cancel();
}

#[test]
fn test_reentrancy() {
    check_reentrancy(queue());
    check_reentrancy(pool());
}

fn check_values<D: DatabaseWriter>(db: D) {
    let mut values = ValueObservation::tracking(count_t).values(&db);
    assert_eq!(values.next_timeout(TIMEOUT).unwrap().unwrap(), 0);
    insert(&db, "a");
    assert_eq!(values.next().unwrap().unwrap(), 1);

    values.cancellable().cancel();
    insert(&db, "b");
    assert!(values.next_timeout(QUIET).is_none());
}

#[test]
fn test_values() {
    check_values(queue());
    check_values(pool());
}

#[test]
fn test_values_end_after_error() {
    let db = queue();
    let mut values = ValueObservation::tracking(|db| db.fetch_count(&Query::select("missing"))).values(&db);
    assert!(values.next().unwrap().is_err());
    assert!(values.next().is_none());
}

fn check_map<D: DatabaseWriter>(db: D) {
    let observation = ValueObservation::tracking(count_t).map(|count| format!("{} rows", count));
    let (_cancellable, (values, _errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), "0 rows");
    insert(&db, "a");
    assert_eq!(values.try_recv().unwrap(), "1 rows");
}

#[test]
fn test_map() {
    check_map(queue());
    check_map(pool());
}

fn check_tracking_region<D: DatabaseWriter>(db: D) {
    let observation = ValueObservation::tracking_region([Region::table("u")], count_t);
    let (cancellable, (values, _errors)) = start(&db, &observation, Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), 0);
    assert_eq!(cancellable.observed_region().to_string(), "u(*)");

    // Changes to the fetched table go unnoticed.
    insert(&db, "a");
    assert!(values.try_recv().is_err());

    db.write(|db| db.insert("u", &[("score", 1.into())])).unwrap();
    assert_eq!(values.try_recv().unwrap(), 1);
}

#[test]
fn test_tracking_region() {
    check_tracking_region(queue());
    check_tracking_region(pool());
}

#[test]
fn test_tracking_region_of_invalid_query() {
    let db = pool();
    let observation = ValueObservation::tracking_region([Query::select("t").columns(["missing"])], count_t);
    let (_cancellable, (values, errors)) = start(&db, &observation, Scheduling::Immediate);
    let error = errors.try_recv().unwrap();
    assert_eq!(error.kind(), ObservationErrorKind::Region);
    assert!(matches!(error.database_error(), Error::ColumnNotFound { .. }));
    assert!(values.try_recv().is_err());
}

#[test]
fn test_schema_change_notifies_every_observer() {
    let db = queue();
    let (_cancellable, (values, errors)) = start(&db, &ValueObservation::tracking(count_t), Scheduling::Immediate);
    assert_eq!(values.try_recv().unwrap(), 0);

    // Notified, but the count did not change.
    db.write(|db| db.drop_view("v")).unwrap();
    assert!(values.try_recv().is_err());
    assert!(errors.try_recv().is_err());

    db.write(|db| db.drop_table("t")).unwrap();
    let error = errors.try_recv().unwrap();
    assert_eq!(error.kind(), ObservationErrorKind::Fetch);
    assert!(values.try_recv().is_err());
}

#[test]
fn test_default_scheduling_from_configuration() {
    let configuration = Configuration::default().default_scheduling(DefaultScheduling::Immediate);
    let db = setup(DatabaseQueue::with_configuration(configuration).unwrap());
    assert!(db.default_scheduling().is_immediate());

    let (sender, values) = unbounded();
    let _cancellable = ValueObservation::tracking(count_t).observe(&db, |_| {}, move |count| {
        let _ = sender.send(count);
    });
    assert_eq!(values.try_recv().unwrap(), 0);
}

type SharedCancellable = Arc<Mutex<Option<DatabaseCancellable>>>;

/// How a callback ends its own observation.
#[derive(Clone, Copy, Debug)]
enum Release {
    Cancel,
    DropHandle,
}

impl Release {
    fn releases() -> [Release; 2] {
        [Release::Cancel, Release::DropHandle]
    }

    /// Ends the observation held in `shared`, if it is there yet.
    fn apply(self, shared: &SharedCancellable, released: &Sender<()>) {
        let taken = shared.lock().take();
        let Some(cancellable) = taken else {
            return;
        };
        match self {
            Release::Cancel => {
                cancellable.cancel();
                assert!(cancellable.is_cancelled());
            }
            Release::DropHandle => drop(cancellable),
        }
        let _ = released.send(());
    }
}

fn assert_released<D: DatabaseWriter, V>(db: &D, values: &Receiver<V>) {
    assert_eq!(db.change_tracker().observer_count(), 0);
    insert(db, "b");
    assert!(values.recv_timeout(QUIET).is_err());
}

fn check_release_from_on_change<D: DatabaseWriter>(db: D, scheduling: Scheduling, release: Release) {
    let shared = SharedCancellable::default();
    let (released_sender, released) = unbounded();
    let (sender, values) = unbounded();
    let handle = Arc::clone(&shared);
    let cancellable = ValueObservation::tracking(count_t).start(&db, scheduling, |_| {}, move |count| {
        if count > 0 {
            release.apply(&handle, &released_sender);
        }
        let _ = sender.send(count);
    });
    *shared.lock() = Some(cancellable);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    released.recv_timeout(TIMEOUT).unwrap();
    // The running delivery completes.
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 1);
    assert_released(&db, &values);
}

fn check_release_from_fetch<D: DatabaseWriter>(db: D, scheduling: Scheduling, release: Release) {
    let shared = SharedCancellable::default();
    let (released_sender, released) = unbounded();
    let handle = Arc::clone(&shared);
    let observation = ValueObservation::tracking(move |db| {
        let count = count_t(db)?;
        if count > 0 {
            release.apply(&handle, &released_sender);
        }
        Ok(count)
    });
    let (cancellable, (values, errors)) = start(&db, &observation, scheduling);
    *shared.lock() = Some(cancellable);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    released.recv_timeout(TIMEOUT).unwrap();
    assert_released(&db, &values);
    assert!(errors.try_recv().is_err());
}

fn check_release_from_value<D: DatabaseWriter>(db: D, scheduling: Scheduling, release: Release) {
    let shared = SharedCancellable::default();
    let (released_sender, released) = unbounded();
    let handle = Arc::clone(&shared);
    let observation = ValueObservation::new(move || {
        let handle = Arc::clone(&handle);
        let released_sender = released_sender.clone();
        AnyValueReducer::new(count_t, move |count: usize| -> Result<Option<usize>> {
            if count > 0 {
                release.apply(&handle, &released_sender);
            }
            Ok(Some(count))
        })
    });
    let (cancellable, (values, errors)) = start(&db, &observation, scheduling);
    *shared.lock() = Some(cancellable);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    released.recv_timeout(TIMEOUT).unwrap();
    assert_released(&db, &values);
    assert!(errors.try_recv().is_err());
}

#[test]
fn test_release_from_on_change() {
    for scheduling in schedulings() {
        for release in Release::releases() {
            check_release_from_on_change(queue(), scheduling.clone(), release);
            check_release_from_on_change(pool(), scheduling.clone(), release);
        }
    }
}

#[test]
fn test_release_from_fetch() {
    for scheduling in schedulings() {
        for release in Release::releases() {
            check_release_from_fetch(queue(), scheduling.clone(), release);
            check_release_from_fetch(pool(), scheduling.clone(), release);
        }
    }
}

#[test]
fn test_release_from_value() {
    for scheduling in schedulings() {
        for release in Release::releases() {
            check_release_from_value(queue(), scheduling.clone(), release);
            check_release_from_value(pool(), scheduling.clone(), release);
        }
    }
}

fn check_cancel_during_writes<D>(db: D, scheduling: Scheduling)
where
    D: DatabaseWriter + Clone + Send + 'static,
{
    let returned = Arc::new(AtomicBool::new(false));
    let late = Arc::new(AtomicUsize::new(0));
    let (sender, values) = unbounded();
    let cancellable = {
        let returned = Arc::clone(&returned);
        let late = Arc::clone(&late);
        ValueObservation::tracking(count_t).start(&db, scheduling, |_| {}, move |count| {
            if returned.load(Ordering::SeqCst) {
                late.fetch_add(1, Ordering::SeqCst);
            }
            let _ = sender.send(count);
        })
    };
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    let writer = {
        let db = db.clone();
        thread::spawn(move || {
            for i in 0..200 {
                insert(&db, &i.to_string());
            }
        })
    };
    let canceller = {
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            cancellable.cancel();
            returned.store(true, Ordering::SeqCst);
        })
    };
    canceller.join().unwrap();
    writer.join().unwrap();
    drain(db.delivery_queue());

    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(db.change_tracker().observer_count(), 0);
    assert_eq!(db.read(count_t).unwrap(), 200);
}

#[test]
fn test_cancel_during_writes() {
    for _ in 0..10 {
        for scheduling in schedulings() {
            check_cancel_during_writes(queue(), scheduling.clone());
            check_cancel_during_writes(pool(), scheduling);
        }
    }
}

fn check_panicking_fetch<D: DatabaseWriter>(db: D, scheduling: Scheduling) {
    let observation = ValueObservation::tracking(|db| {
        let count = count_t(db)?;
        if count > 0 {
            panic!("fetched {} rows", count);
        }
        Ok(count)
    });
    let (_cancellable, (values, errors)) = start(&db, &observation, scheduling);
    assert_eq!(values.recv_timeout(TIMEOUT).unwrap(), 0);

    insert(&db, "a");
    let error = errors.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(error.kind(), ObservationErrorKind::Fetch);
    assert!(error.database_error().is_custom::<ReducerPanic>());
    assert_eq!(db.change_tracker().observer_count(), 0);

    // The writer is not affected.
    insert(&db, "b");
    assert!(values.recv_timeout(QUIET).is_err());
    assert!(errors.try_recv().is_err());
    assert_eq!(db.read(count_t).unwrap(), 2);
}

#[test]
fn test_panicking_fetch_fails_observation() {
    for scheduling in schedulings() {
        check_panicking_fetch(queue(), scheduling.clone());
        check_panicking_fetch(pool(), scheduling);
    }
}
