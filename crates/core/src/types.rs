//! Data type definitions for Vigil.
//!
//! This module defines the column types a table can declare.

/// Supported column types.
///
/// Storage follows the usual embedded-database affinities: every value is
/// either null or one of these five classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean type (true/false)
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point number
    Real,
    /// UTF-8 text
    Text,
    /// Binary data
    Blob,
}

impl DataType {
    /// Returns whether this type is nullable by default.
    pub fn is_nullable_by_default(&self) -> bool {
        matches!(self, DataType::Blob)
    }

    /// Returns whether a column of this type can alias the rowid.
    pub fn can_alias_rowid(&self) -> bool {
        matches!(self, DataType::Integer)
    }
}
