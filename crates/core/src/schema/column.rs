//! Column definition for Vigil schema.

use crate::types::DataType;
use crate::value::Value;
use alloc::string::String;

/// A column definition in a table schema.
#[derive(Clone, Debug)]
pub struct Column {
    /// Column name.
    name: String,
    /// Data type of the column.
    data_type: DataType,
    /// Whether this column allows null values.
    nullable: bool,
    /// Default value for this column.
    default_value: Option<Value>,
    /// Whether this column is an alias for the rowid.
    rowid_alias: bool,
    /// Column index in the table (0-based).
    index: usize,
}

impl Column {
    /// Creates a new column definition.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default_value: None,
            rowid_alias: false,
            index: 0,
        }
    }

    /// Sets whether this column is nullable.
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Sets the default value for this column.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub(crate) fn rowid_alias(mut self) -> Self {
        self.rowid_alias = true;
        self.nullable = false;
        self
    }

    pub(crate) fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Returns the column name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the data type.
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns whether this column is nullable.
    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns whether this column aliases the rowid.
    #[inline]
    pub fn is_rowid_alias(&self) -> bool {
        self.rowid_alias
    }

    /// Returns the value stored when an insert does not provide one.
    pub fn get_default_value(&self) -> Value {
        match &self.default_value {
            Some(value) => value.clone(),
            None if self.nullable => Value::Null,
            None => Value::default_for_type(self.data_type),
        }
    }

    /// Returns the column index.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.data_type == other.data_type
    }
}
