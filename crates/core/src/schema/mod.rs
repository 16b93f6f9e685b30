//! Schema module for Vigil.
//!
//! This module contains table, column and view definitions.

mod column;
mod table;
mod view;

pub use column::Column;
pub use table::{Table, TableBuilder};
pub use view::View;
