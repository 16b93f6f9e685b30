//! Error types for Vigil.

use crate::types::DataType;
use alloc::boxed::Box;
use alloc::string::String;
use thiserror::Error;

/// Result type alias for Vigil operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for database and observation operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Type mismatch error.
    #[error("type mismatch on column {column}: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        got: DataType,
    },
    /// Null constraint violation.
    #[error("NOT NULL constraint failed: {table}.{column}")]
    NullConstraint { table: String, column: String },
    /// Row not found.
    #[error("no row with rowid {rowid} in table {table}")]
    RowNotFound { table: String, rowid: u64 },
    /// Invalid schema definition.
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },
    /// Column not found.
    #[error("no such column: {table}.{column}")]
    ColumnNotFound { table: String, column: String },
    /// Table or view not found.
    #[error("no such table: {name}")]
    TableNotFound { name: String },
    /// A table or view with the same name already exists.
    #[error("table {name} already exists")]
    TableExists { name: String },
    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
    /// A database access was attempted from inside a write on the writer thread.
    #[error("database methods are not reentrant")]
    Reentrancy,
    /// The database, or one of its execution queues, has been closed.
    #[error("database is closed")]
    Closed,
    /// Error raised by application code (custom reducers, write bodies).
    #[error(transparent)]
    Custom(Box<dyn core::error::Error + Send + Sync>),
}

impl Error {
    /// Creates a table not found error.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        Error::TableNotFound { name: name.into() }
    }

    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>, rowid: u64) -> Self {
        Error::RowNotFound {
            table: table.into(),
            rowid,
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an application error.
    pub fn custom<E>(error: E) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Box::new(error))
    }

    /// Returns the wrapped application error, if this is one.
    pub fn as_custom(&self) -> Option<&(dyn core::error::Error + Send + Sync + 'static)> {
        match self {
            Error::Custom(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// Returns true if this error wraps an application error of type `E`.
    pub fn is_custom<E: core::error::Error + 'static>(&self) -> bool {
        self.as_custom().is_some_and(|inner| inner.is::<E>())
    }
}
