//! Cache management for Vigil.
//!
//! This module provides the `TableCache` struct which holds every table and
//! view of a database. A committed `TableCache` is shared behind an `Arc` and
//! copied on write, which is what gives readers their snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_core::schema::{Table, View};
use vigil_core::{Error, Result, Row, RowId};

use crate::row_store::RowStore;

/// A table or view a query can read from.
#[derive(Clone, Copy, Debug)]
pub enum Source<'a> {
    /// A base table.
    Table(&'a RowStore),
    /// A view and the store of its base table.
    View(&'a View, &'a RowStore),
}

/// Cache for managing table stores and view definitions.
#[derive(Clone, Debug, Default)]
pub struct TableCache {
    /// Table name → RowStore mapping.
    tables: BTreeMap<String, RowStore>,
    /// View name → definition mapping.
    views: BTreeMap<String, View>,
}

impl TableCache {
    /// Creates a new empty table cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name_is_free(&self, name: &str) -> Result<()> {
        if self.tables.contains_key(name) || self.views.contains_key(name) {
            return Err(Error::TableExists { name: name.into() });
        }
        Ok(())
    }

    /// Creates a table in the cache.
    pub fn create_table(&mut self, schema: Table) -> Result<()> {
        self.check_name_is_free(schema.name())?;
        self.tables.insert(schema.name().into(), RowStore::new(schema));
        Ok(())
    }

    /// Drops a table from the cache and returns its store.
    ///
    /// Fails while a view still reads from the table.
    pub fn drop_table(&mut self, name: &str) -> Result<RowStore> {
        if let Some(view) = self.views.values().find(|v| v.base_table() == name) {
            return Err(Error::invalid_operation(format!(
                "cannot drop table {}: view {} depends on it",
                name,
                view.name()
            )));
        }
        self.tables
            .remove(name)
            .ok_or_else(|| Error::table_not_found(name))
    }

    /// Puts back a dropped table store. Used by rollback.
    pub(crate) fn restore_table(&mut self, store: RowStore) {
        self.tables.insert(store.schema().name().into(), store);
    }

    /// Creates a view. The base table and view columns must exist.
    pub fn create_view(&mut self, view: View) -> Result<()> {
        self.check_name_is_free(view.name())?;
        let base = self
            .tables
            .get(view.base_table())
            .ok_or_else(|| Error::table_not_found(view.base_table()))?;
        view.resolve_columns(base.schema())?;
        self.views.insert(view.name().into(), view);
        Ok(())
    }

    /// Drops a view and returns its definition.
    pub fn drop_view(&mut self, name: &str) -> Result<View> {
        self.views
            .remove(name)
            .ok_or_else(|| Error::table_not_found(name))
    }

    /// Puts back a dropped view. Used by rollback.
    pub(crate) fn restore_view(&mut self, view: View) {
        self.views.insert(view.name().into(), view);
    }

    /// Gets a reference to a table store.
    pub fn get_table(&self, name: &str) -> Option<&RowStore> {
        self.tables.get(name)
    }

    /// Gets a mutable reference to a table store.
    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut RowStore> {
        self.tables.get_mut(name)
    }

    /// Gets a view definition.
    pub fn get_view(&self, name: &str) -> Option<&View> {
        self.views.get(name)
    }

    /// Resolves a table or view name.
    pub fn source(&self, name: &str) -> Result<Source<'_>> {
        if let Some(store) = self.tables.get(name) {
            return Ok(Source::Table(store));
        }
        let view = self
            .views
            .get(name)
            .ok_or_else(|| Error::table_not_found(name))?;
        let base = self
            .tables
            .get(view.base_table())
            .ok_or_else(|| Error::table_not_found(view.base_table()))?;
        Ok(Source::View(view, base))
    }

    /// Returns the number of tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Returns all table names.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|s| s.as_str()).collect()
    }

    /// Returns all view names.
    pub fn view_names(&self) -> Vec<&str> {
        self.views.keys().map(|s| s.as_str()).collect()
    }

    /// Gets a row by table name and rowid.
    pub fn get_row(&self, table: &str, rowid: RowId) -> Option<Arc<Row>> {
        self.tables.get(table).and_then(|t| t.get(rowid))
    }
}
