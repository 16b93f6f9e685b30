//! Transaction management for Vigil.
//!
//! A `Transaction` applies writes directly to a `TableCache` and journals
//! them. Committing yields the region the transaction changed; rolling back
//! replays the journal in reverse.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};
use vigil_core::schema::{Table, View};
use vigil_core::{Error, Region, Result, Row, RowId, Value};

use crate::cache::TableCache;
use crate::journal::{Journal, JournalEntry};
use crate::query::Query;

/// Global transaction ID counter.
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Transaction ID type.
pub type TransactionId = u64;

/// Transaction state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// A write transaction.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    journal: Journal,
    state: TransactionState,
}

impl Transaction {
    /// Creates a new transaction.
    pub fn begin() -> Self {
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        trace!(transaction = id, "begin");
        Self {
            id,
            journal: Journal::new(),
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true if the transaction is active.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn check_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::invalid_operation("transaction is not active"));
        }
        Ok(())
    }

    /// Returns the journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Creates a table.
    pub fn create_table(&mut self, cache: &mut TableCache, schema: Table) -> Result<()> {
        self.check_active()?;
        let name = schema.name().to_string();
        cache.create_table(schema)?;
        self.journal.record(JournalEntry::CreateTable { name });
        Ok(())
    }

    /// Drops a table and its rows.
    pub fn drop_table(&mut self, cache: &mut TableCache, name: &str) -> Result<()> {
        self.check_active()?;
        let store = cache.drop_table(name)?;
        self.journal.record(JournalEntry::DropTable { store });
        Ok(())
    }

    /// Creates a view.
    pub fn create_view(&mut self, cache: &mut TableCache, view: View) -> Result<()> {
        self.check_active()?;
        let name = view.name().to_string();
        cache.create_view(view)?;
        self.journal.record(JournalEntry::CreateView { name });
        Ok(())
    }

    /// Drops a view.
    pub fn drop_view(&mut self, cache: &mut TableCache, name: &str) -> Result<()> {
        self.check_active()?;
        let view = cache.drop_view(name)?;
        self.journal.record(JournalEntry::DropView { view });
        Ok(())
    }

    /// Inserts a row built from named values. Returns its rowid.
    pub fn insert(
        &mut self,
        cache: &mut TableCache,
        table: &str,
        values: &[(&str, Value)],
    ) -> Result<RowId> {
        self.check_active()?;
        let store = cache
            .get_table_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let rowid = store.insert(values)?;
        self.journal.record_insert(table, rowid);
        Ok(rowid)
    }

    /// Updates named columns of a row.
    pub fn update(
        &mut self,
        cache: &mut TableCache,
        table: &str,
        rowid: RowId,
        values: &[(&str, Value)],
    ) -> Result<()> {
        self.check_active()?;
        let store = cache
            .get_table_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let old = store.update(rowid, values)?;
        let columns = values.iter().map(|(column, _)| column.to_string()).collect();
        self.journal.record_update(table, columns, old);
        Ok(())
    }

    /// Deletes a row. Returns false if there was no such row.
    pub fn delete(&mut self, cache: &mut TableCache, table: &str, rowid: RowId) -> Result<bool> {
        self.check_active()?;
        let store = cache
            .get_table_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        if store.get_ref(rowid).is_none() {
            return Ok(false);
        }
        let row = store.delete(rowid)?;
        self.journal.record_delete(table, row);
        Ok(true)
    }

    /// Deletes every row of a table. Returns the number of deleted rows.
    pub fn delete_all(&mut self, cache: &mut TableCache, table: &str) -> Result<usize> {
        self.check_active()?;
        let store = cache
            .get_table_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let rowids = store.rowids();
        for rowid in &rowids {
            let row = store.delete(*rowid)?;
            self.journal.record_delete(table, row);
        }
        Ok(rowids.len())
    }

    /// Runs a query against the uncommitted state.
    pub fn fetch_all(&self, cache: &TableCache, query: &Query) -> Result<Vec<Row>> {
        query.execute(cache)
    }

    /// Counts the rows of a query against the uncommitted state.
    pub fn fetch_count(&self, cache: &TableCache, query: &Query) -> Result<usize> {
        let rows = query.clone().count().execute(cache)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0) as usize)
    }

    /// Commits the transaction and returns the region it changed.
    ///
    /// A transaction that changed nothing returns the empty region.
    pub fn commit(mut self) -> Result<Region> {
        self.check_active()?;
        self.state = TransactionState::Committed;
        let region = self.journal.changed_region();
        debug!(
            transaction = self.id,
            entries = self.journal.entries().len(),
            changes = %region,
            "commit"
        );
        Ok(region)
    }

    /// Rolls back the transaction.
    pub fn rollback(mut self, cache: &mut TableCache) -> Result<()> {
        self.check_active()?;
        self.state = TransactionState::RolledBack;
        debug!(
            transaction = self.id,
            entries = self.journal.entries().len(),
            "rollback"
        );
        self.journal.rollback(cache);
        Ok(())
    }
}
