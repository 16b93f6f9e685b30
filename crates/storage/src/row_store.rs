//! Row storage for Vigil.
//!
//! This module provides the `RowStore` struct which manages the rows of a
//! single table, keyed and ordered by rowid.

use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_core::schema::Table;
use vigil_core::{Error, Result, Row, RowId, Value};

/// Row storage for a single table.
///
/// Rows are shared behind `Arc` so that cloning a store (to publish a
/// snapshot) copies pointers, not values.
#[derive(Clone, Debug)]
pub struct RowStore {
    schema: Table,
    rows: BTreeMap<RowId, Arc<Row>>,
    /// Next rowid to assign. Never decreases, so rowids are not reused.
    next_rowid: RowId,
}

impl RowStore {
    /// Creates a new row store for the given table schema.
    pub fn new(schema: Table) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_rowid: 1,
        }
    }

    /// Returns the table schema.
    #[inline]
    pub fn schema(&self) -> &Table {
        &self.schema
    }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Gets a row by rowid.
    pub fn get(&self, rowid: RowId) -> Option<Arc<Row>> {
        self.rows.get(&rowid).cloned()
    }

    /// Iterates over all rows in rowid order.
    pub fn scan(&self) -> impl Iterator<Item = &Arc<Row>> {
        self.rows.values()
    }

    /// Returns a reference to a row without cloning the `Arc`.
    pub fn get_ref(&self, rowid: RowId) -> Option<&Arc<Row>> {
        self.rows.get(&rowid)
    }

    /// Returns all rowids in order.
    pub fn rowids(&self) -> Vec<RowId> {
        self.rows.keys().copied().collect()
    }

    /// Inserts a row built from named values.
    ///
    /// Columns without a value receive their default. A value given for the
    /// rowid alias column chooses the rowid.
    pub fn insert(&mut self, values: &[(&str, Value)]) -> Result<RowId> {
        let mut row: Vec<Value> = self
            .schema
            .columns()
            .iter()
            .map(|c| c.get_default_value())
            .collect();
        let mut rowid = None;
        for (column, value) in values {
            let index = self.schema.require_column_index(column)?;
            if Some(index) == self.schema.rowid_alias() {
                rowid = match value {
                    Value::Null => None,
                    Value::Integer(id) if *id > 0 => Some(*id as RowId),
                    other => {
                        return Err(Error::invalid_operation(format!(
                            "invalid rowid {} for table {}",
                            other,
                            self.schema.name()
                        )))
                    }
                };
                continue;
            }
            row[index] = value.clone();
        }

        let rowid = rowid.unwrap_or(self.next_rowid);
        if self.rows.contains_key(&rowid) {
            return Err(Error::invalid_operation(format!(
                "UNIQUE constraint failed: {}.rowid = {}",
                self.schema.name(),
                rowid
            )));
        }
        if let Some(alias) = self.schema.rowid_alias() {
            row[alias] = Value::Integer(rowid as i64);
        }
        for (index, value) in row.iter().enumerate() {
            self.schema.check_value(index, value)?;
        }

        self.rows.insert(rowid, Arc::new(Row::new(rowid, row)));
        self.next_rowid = self.next_rowid.max(rowid + 1);
        Ok(rowid)
    }

    /// Updates named columns of a row. Returns the previous row.
    pub fn update(&mut self, rowid: RowId, values: &[(&str, Value)]) -> Result<Arc<Row>> {
        let old = self
            .rows
            .get(&rowid)
            .cloned()
            .ok_or_else(|| Error::row_not_found(self.schema.name(), rowid))?;
        let mut new = (*old).clone();
        for (column, value) in values {
            let index = self.schema.require_column_index(column)?;
            if Some(index) == self.schema.rowid_alias() {
                return Err(Error::invalid_operation("updating the rowid is not supported"));
            }
            self.schema.check_value(index, value)?;
            new.set(index, value.clone());
        }
        self.rows.insert(rowid, Arc::new(new));
        Ok(old)
    }

    /// Deletes a row. Returns the deleted row.
    pub fn delete(&mut self, rowid: RowId) -> Result<Arc<Row>> {
        self.rows
            .remove(&rowid)
            .ok_or_else(|| Error::row_not_found(self.schema.name(), rowid))
    }

    /// Puts a previously stored row back in place. Used by rollback.
    pub(crate) fn restore(&mut self, row: Arc<Row>) {
        self.rows.insert(row.id(), row);
    }
}
