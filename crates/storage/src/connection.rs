//! Write access to a database inside an open transaction.

use vigil_core::schema::{Table, View};
use vigil_core::{Region, Result, Row, RowId, Value};

use crate::cache::TableCache;
use crate::query::Query;
use crate::transaction::Transaction;

/// A cache with an open transaction.
///
/// This is what write bodies receive: every mutation goes through the
/// transaction journal, and reads see the uncommitted state.
#[derive(Debug)]
pub struct Connection<'a> {
    cache: &'a mut TableCache,
    transaction: Transaction,
}

impl<'a> Connection<'a> {
    /// Begins a transaction on `cache`.
    pub fn begin(cache: &'a mut TableCache) -> Self {
        Self {
            cache,
            transaction: Transaction::begin(),
        }
    }

    /// Returns the uncommitted state.
    pub fn cache(&self) -> &TableCache {
        self.cache
    }

    /// Returns the open transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn create_table(&mut self, schema: Table) -> Result<()> {
        self.transaction.create_table(self.cache, schema)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.transaction.drop_table(self.cache, name)
    }

    pub fn create_view(&mut self, view: View) -> Result<()> {
        self.transaction.create_view(self.cache, view)
    }

    pub fn drop_view(&mut self, name: &str) -> Result<()> {
        self.transaction.drop_view(self.cache, name)
    }

    /// Inserts a row. Returns its rowid.
    pub fn insert(&mut self, table: &str, values: &[(&str, Value)]) -> Result<RowId> {
        self.transaction.insert(self.cache, table, values)
    }

    pub fn update(&mut self, table: &str, rowid: RowId, values: &[(&str, Value)]) -> Result<()> {
        self.transaction.update(self.cache, table, rowid, values)
    }

    /// Deletes a row. Returns false if there was no such row.
    pub fn delete(&mut self, table: &str, rowid: RowId) -> Result<bool> {
        self.transaction.delete(self.cache, table, rowid)
    }

    /// Deletes every row of a table. Returns the number of deleted rows.
    pub fn delete_all(&mut self, table: &str) -> Result<usize> {
        self.transaction.delete_all(self.cache, table)
    }

    pub fn fetch_all(&self, query: &Query) -> Result<Vec<Row>> {
        self.transaction.fetch_all(self.cache, query)
    }

    pub fn fetch_one(&self, query: &Query) -> Result<Option<Row>> {
        let rows = self
            .transaction
            .fetch_all(self.cache, &query.clone().limit(1))?;
        Ok(rows.into_iter().next())
    }

    pub fn fetch_count(&self, query: &Query) -> Result<usize> {
        self.transaction.fetch_count(self.cache, query)
    }

    /// Commits and returns the changed region.
    pub fn commit(self) -> Result<Region> {
        self.transaction.commit()
    }

    /// Rolls back every change made through this connection.
    pub fn rollback(self) -> Result<()> {
        self.transaction.rollback(self.cache)
    }
}
