//! Row structure for Vigil.
//!
//! This module defines the `Row` struct which represents a single row in a table.

use crate::value::Value;
use alloc::vec::Vec;

/// Unique identifier for a row within its table.
pub type RowId = u64;

/// A row in a database table or query result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Row {
    /// Rowid of the source row. Zero for computed rows (aggregates).
    id: RowId,
    /// Values stored in this row, indexed by column position.
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row with the given rowid and values.
    pub fn new(id: RowId, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    /// Creates a row that does not correspond to a stored row.
    pub fn computed(values: Vec<Value>) -> Self {
        Self::new(0, values)
    }

    /// Returns the rowid.
    #[inline]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns a reference to the values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Gets a value at the given column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Sets a value at the given column index.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Returns the number of values in this row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
