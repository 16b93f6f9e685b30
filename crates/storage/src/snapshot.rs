//! Read-only views of a committed database state.

use std::cell::RefCell;
use std::sync::Arc;

use vigil_core::{Region, Result, Row, Value};

use crate::cache::TableCache;
use crate::query::Query;

/// An immutable database state, as left by one committed transaction.
///
/// Every query executed through a snapshot records the base-table region it
/// read. Observations use the recorded region to learn what they depend on.
#[derive(Debug)]
pub struct Snapshot {
    cache: Arc<TableCache>,
    recorded: RefCell<Region>,
}

impl Snapshot {
    /// Creates a snapshot of a committed cache.
    pub fn new(cache: Arc<TableCache>) -> Self {
        Self {
            cache,
            recorded: RefCell::new(Region::empty()),
        }
    }

    /// Returns the underlying cache.
    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    fn record(&self, query: &Query) -> Result<()> {
        let region = query.observed_region(&self.cache)?;
        self.recorded.borrow_mut().form_union(&region);
        Ok(())
    }

    /// Returns the union of the regions read so far.
    pub fn recorded_region(&self) -> Region {
        self.recorded.borrow().clone()
    }

    /// Returns the recorded region and starts recording afresh.
    pub fn take_recorded_region(&self) -> Region {
        self.recorded.replace(Region::empty())
    }

    /// Returns the declared region of a query, without running it.
    pub fn region(&self, query: &Query) -> Result<Region> {
        query.region(&self.cache)
    }

    /// Fetches every row of a query.
    pub fn fetch_all(&self, query: &Query) -> Result<Vec<Row>> {
        let rows = query.execute(&self.cache)?;
        self.record(query)?;
        Ok(rows)
    }

    /// Fetches the first row of a query.
    pub fn fetch_one(&self, query: &Query) -> Result<Option<Row>> {
        let rows = query.clone().limit(1).execute(&self.cache)?;
        self.record(query)?;
        Ok(rows.into_iter().next())
    }

    /// Fetches the first column of the first row.
    pub fn fetch_value(&self, query: &Query) -> Result<Option<Value>> {
        Ok(self
            .fetch_one(query)?
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// Counts the rows of a query.
    pub fn fetch_count(&self, query: &Query) -> Result<usize> {
        let query = query.clone().count();
        let count = self
            .fetch_value(&query)?
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        Ok(count as usize)
    }
}
