//! Vigil Core - Core types, schema definitions and region algebra for Vigil.
//!
//! This crate provides the foundational types shared by the storage engine and
//! the observation layer:
//!
//! - `DataType`: Supported column types (Boolean, Integer, Real, Text, Blob)
//! - `Value`: Runtime values that can be stored in a cell
//! - `Row`: A row of values keyed by its rowid
//! - `schema`: Table and view definitions
//! - `Region`: The set of tables, columns and rows a query depends on
//! - `Error`: Error types for database operations
//!
//! # Example
//!
//! ```rust
//! use vigil_core::{DataType, Region, Row, Value};
//! use vigil_core::schema::TableBuilder;
//!
//! let table = TableBuilder::new("player")
//!     .unwrap()
//!     .add_rowid_column("id")
//!     .unwrap()
//!     .add_column("name", DataType::Text)
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! assert_eq!(table.column_names(), vec!["id", "name"]);
//!
//! let row = Row::new(1, vec![Value::Integer(1), Value::Text("Arthur".into())]);
//! assert_eq!(row.get(1), Some(&Value::Text("Arthur".into())));
//!
//! let observed = Region::columns("player", ["name"]);
//! let changes = Region::columns("player", ["name"]).with_rowids("player", [1]);
//! assert!(observed.is_modified_by(&changes));
//! ```

#![no_std]

extern crate alloc;

mod error;
pub mod region;
mod row;
pub mod schema;
mod types;
mod value;

pub use error::{Error, Result};
pub use region::{Region, TableRegion};
pub use row::{Row, RowId};
pub use types::DataType;
pub use value::Value;
