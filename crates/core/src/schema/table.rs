//! Table definition for Vigil schema.

use super::column::Column;
use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// A table definition in the database schema.
///
/// Every table has an implicit integer rowid. At most one `Integer` column
/// may alias it, in which case reading that column yields the rowid.
#[derive(Clone, Debug)]
pub struct Table {
    /// Table name.
    name: String,
    /// Column definitions.
    columns: Vec<Column>,
    /// Position of the rowid alias column, if any.
    rowid_alias: Option<usize>,
}

impl Table {
    /// Returns the table name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    /// Gets a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Gets a column index by name.
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Gets a column index by name, failing with `ColumnNotFound`.
    pub fn require_column_index(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| Error::column_not_found(&self.name, name))
    }

    /// Returns the position of the rowid alias column.
    #[inline]
    pub fn rowid_alias(&self) -> Option<usize> {
        self.rowid_alias
    }

    /// Checks a value against the declared type and nullability of a column.
    pub fn check_value(&self, index: usize, value: &Value) -> Result<()> {
        let column = &self.columns[index];
        match value.data_type() {
            None if !column.is_nullable() => Err(Error::NullConstraint {
                table: self.name.clone(),
                column: column.name().into(),
            }),
            None => Ok(()),
            Some(got) if got != column.data_type() => Err(Error::TypeMismatch {
                column: column.name().into(),
                expected: column.data_type(),
                got,
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Builder for creating table definitions.
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    rowid_alias: Option<usize>,
}

impl TableBuilder {
    /// Creates a new table builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            columns: Vec::new(),
            rowid_alias: None,
        })
    }

    /// Adds a column to the table.
    pub fn add_column(self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        let name = name.into();
        let nullable = data_type.is_nullable_by_default();
        self.push(Column::new(name, data_type).nullable(nullable))
    }

    /// Adds an `INTEGER PRIMARY KEY` column that aliases the rowid.
    pub fn add_rowid_column(mut self, name: impl Into<String>) -> Result<Self> {
        if self.rowid_alias.is_some() {
            return Err(Error::invalid_schema(format!(
                "table {} already has a rowid alias",
                self.name
            )));
        }
        self.rowid_alias = Some(self.columns.len());
        self.push(Column::new(name, DataType::Integer).rowid_alias())
    }

    /// Marks columns as nullable.
    pub fn add_nullable(mut self, columns: &[&str]) -> Self {
        for name in columns {
            if let Some(col) = self.columns.iter_mut().find(|c| c.name() == *name) {
                if !col.is_rowid_alias() {
                    *col = col.clone().nullable(true);
                }
            }
        }
        self
    }

    /// Marks columns as NOT NULL.
    pub fn add_not_null(mut self, columns: &[&str]) -> Self {
        for name in columns {
            if let Some(col) = self.columns.iter_mut().find(|c| c.name() == *name) {
                *col = col.clone().nullable(false);
            }
        }
        self
    }

    /// Sets the default value of a column.
    pub fn add_default(mut self, column: &str, value: Value) -> Result<Self> {
        let col = self
            .columns
            .iter_mut()
            .find(|c| c.name() == column)
            .ok_or_else(|| Error::column_not_found(&self.name, column))?;
        *col = col.clone().default_value(value);
        Ok(self)
    }

    fn push(mut self, column: Column) -> Result<Self> {
        check_naming_rules(column.name())?;
        if self.columns.iter().any(|c| c.name() == column.name()) {
            return Err(Error::invalid_schema(format!(
                "duplicate column name: {}",
                column.name()
            )));
        }
        self.columns.push(column);
        Ok(self)
    }

    /// Builds the table definition.
    pub fn build(self) -> Result<Table> {
        if self.columns.is_empty() {
            return Err(Error::invalid_schema(format!(
                "table {} must have at least one column",
                self.name
            )));
        }
        let columns = self
            .columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.with_index(i))
            .collect();
        Ok(Table {
            name: self.name,
            columns,
            rowid_alias: self.rowid_alias,
        })
    }
}

/// Validates a name follows naming rules.
pub(crate) fn check_naming_rules(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err(Error::invalid_schema("name cannot be empty")),
        Some(first) if !first.is_ascii_alphabetic() && first != '_' => Err(Error::invalid_schema(
            format!("name must start with letter or underscore: {}", name),
        )),
        Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => Err(
            Error::invalid_schema(format!("name contains invalid characters: {}", name)),
        ),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn player() -> Table {
        TableBuilder::new("player")
            .unwrap()
            .add_rowid_column("id")
            .unwrap()
            .add_column("name", DataType::Text)
            .unwrap()
            .add_column("score", DataType::Integer)
            .unwrap()
            .add_not_null(&["name", "score"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_builder() {
        let table = player();
        assert_eq!(table.name(), "player");
        assert_eq!(table.column_names(), vec!["id", "name", "score"]);
        assert_eq!(table.rowid_alias(), Some(0));
        assert_eq!(table.get_column_index("score"), Some(2));
        assert_eq!(table.columns()[2].index(), 2);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let result = TableBuilder::new("t")
            .unwrap()
            .add_column("a", DataType::Integer)
            .unwrap()
            .add_column("a", DataType::Text);
        assert!(matches!(result, Err(Error::InvalidSchema { .. })));
    }

    #[test]
    fn test_single_rowid_alias() {
        let result = TableBuilder::new("t")
            .unwrap()
            .add_rowid_column("id")
            .unwrap()
            .add_rowid_column("other");
        assert!(result.is_err());
    }

    #[test]
    fn test_naming_rules() {
        assert!(TableBuilder::new("").is_err());
        assert!(TableBuilder::new("1t").is_err());
        assert!(TableBuilder::new("a-b").is_err());
        assert!(TableBuilder::new("_ok").is_ok());
        assert!(TableBuilder::new("t").unwrap().build().is_err());
    }

    #[test]
    fn test_check_value() {
        let table = player();
        assert!(table.check_value(1, &Value::Text("Arthur".into())).is_ok());
        assert!(matches!(
            table.check_value(1, &Value::Null),
            Err(Error::NullConstraint { .. })
        ));
        assert!(matches!(
            table.check_value(2, &Value::Text("x".into())),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_require_column_index() {
        let table = player();
        assert_eq!(table.require_column_index("name").unwrap(), 1);
        assert!(matches!(
            table.require_column_index("missing"),
            Err(Error::ColumnNotFound { .. })
        ));
    }
}
