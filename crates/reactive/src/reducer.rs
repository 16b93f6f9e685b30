//! Reducers turn database snapshots into observed values.
//!
//! Evaluating an observation is two steps. `fetch` reads a snapshot, and
//! `reduce` turns what was fetched into the next value to deliver, or `None`
//! when there is nothing new to tell.

use std::sync::Arc;

use vigil_core::Result;
use vigil_storage::Snapshot;

/// Fetches and reduces observed values.
///
/// An observation creates one reducer per `start`, and never runs two
/// evaluations of the same reducer at the same time.
pub trait ValueReducer: Send + 'static {
    /// What `fetch` reads from the database.
    type Fetched: Send + 'static;
    /// The delivered value.
    type Value: Send + 'static;

    /// Reads the database.
    fn fetch(&mut self, snapshot: &Snapshot) -> Result<Self::Fetched>;

    /// Returns the value to deliver, if any.
    fn reduce(&mut self, fetched: Self::Fetched) -> Result<Option<Self::Value>>;
}

type FetchFn<T> = Arc<dyn Fn(&Snapshot) -> Result<T> + Send + Sync>;

/// Delivers fetched values, skipping consecutive duplicates.
pub struct RemoveDuplicates<T> {
    fetch: FetchFn<T>,
    last: Option<T>,
}

impl<T> RemoveDuplicates<T> {
    pub(crate) fn new(fetch: FetchFn<T>) -> Self {
        Self { fetch, last: None }
    }
}

impl<T> ValueReducer for RemoveDuplicates<T>
where
    T: PartialEq + Clone + Send + 'static,
{
    type Fetched = T;
    type Value = T;

    fn fetch(&mut self, snapshot: &Snapshot) -> Result<T> {
        (self.fetch)(snapshot)
    }

    fn reduce(&mut self, fetched: T) -> Result<Option<T>> {
        if self.last.as_ref() == Some(&fetched) {
            return Ok(None);
        }
        self.last = Some(fetched.clone());
        Ok(Some(fetched))
    }
}

/// A reducer built from a pair of closures.
///
/// `value` decides alone what gets delivered: returning `Ok(None)` skips a
/// fetch, returning an error ends the observation.
pub struct AnyValueReducer<Fe, Va> {
    fetch: Fe,
    value: Va,
}

impl<Fe, Va> AnyValueReducer<Fe, Va> {
    pub fn new<F, V>(fetch: Fe, value: Va) -> Self
    where
        Fe: FnMut(&Snapshot) -> Result<F> + Send + 'static,
        Va: FnMut(F) -> Result<Option<V>> + Send + 'static,
    {
        Self { fetch, value }
    }
}

impl<Fe, Va, F, V> ValueReducer for AnyValueReducer<Fe, Va>
where
    Fe: FnMut(&Snapshot) -> Result<F> + Send + 'static,
    Va: FnMut(F) -> Result<Option<V>> + Send + 'static,
    F: Send + 'static,
    V: Send + 'static,
{
    type Fetched = F;
    type Value = V;

    fn fetch(&mut self, snapshot: &Snapshot) -> Result<F> {
        (self.fetch)(snapshot)
    }

    fn reduce(&mut self, fetched: F) -> Result<Option<V>> {
        (self.value)(fetched)
    }
}

/// Transforms the values of another reducer.
pub struct Map<R: ValueReducer, U> {
    base: R,
    transform: Arc<dyn Fn(R::Value) -> U + Send + Sync>,
}

impl<R: ValueReducer, U> Map<R, U> {
    pub(crate) fn new(base: R, transform: Arc<dyn Fn(R::Value) -> U + Send + Sync>) -> Self {
        Self { base, transform }
    }
}

impl<R, U> ValueReducer for Map<R, U>
where
    R: ValueReducer,
    U: Send + 'static,
{
    type Fetched = R::Fetched;
    type Value = U;

    fn fetch(&mut self, snapshot: &Snapshot) -> Result<R::Fetched> {
        self.base.fetch(snapshot)
    }

    fn reduce(&mut self, fetched: R::Fetched) -> Result<Option<U>> {
        Ok(self.base.reduce(fetched)?.map(|value| (self.transform)(value)))
    }
}
