//! View definition for Vigil schema.

use super::table::{check_naming_rules, Table};
use crate::error::{Error, Result};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A view defined as a projection of a single base table.
///
/// `View::new("v", "t")` is `CREATE VIEW v AS SELECT * FROM t`; restricting
/// the column list selects only those base columns, under the same names.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    name: String,
    base_table: String,
    /// Projected base columns. `None` selects every base column.
    columns: Option<Vec<String>>,
}

impl View {
    /// Creates a `SELECT *` view over `base_table`.
    pub fn new(name: impl Into<String>, base_table: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            base_table: base_table.into(),
            columns: None,
        })
    }

    /// Restricts the view to the given base columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the view name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the table the view reads from.
    #[inline]
    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    /// Resolves the view's column names against its base table.
    pub fn resolve_columns(&self, base: &Table) -> Result<Vec<String>> {
        match &self.columns {
            None => Ok(base.column_names().into_iter().map(ToString::to_string).collect()),
            Some(columns) => {
                for column in columns {
                    base.require_column_index(column)?;
                }
                Ok(columns.clone())
            }
        }
    }

    /// Maps view column names to base-table column positions.
    pub fn base_indices(&self, base: &Table) -> Result<Vec<usize>> {
        if base.name() != self.base_table {
            return Err(Error::invalid_operation("view resolved against the wrong table"));
        }
        self.resolve_columns(base)?
            .iter()
            .map(|column| base.require_column_index(column))
            .collect()
    }
}
