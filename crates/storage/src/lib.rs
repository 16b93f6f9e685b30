//! Vigil Storage - In-memory storage engine for Vigil.
//!
//! This crate provides the storage layer observations run against:
//!
//! - `RowStore`: Rows of one table, keyed by rowid
//! - `TableCache`: Tables and views of a database
//! - `Journal`: Change tracking for transactions
//! - `Transaction`: Journaled writes with rollback and changed-region reporting
//! - `Connection`: A cache with an open transaction, handed to write bodies
//! - `Query`: Select queries and the regions they depend on
//! - `Snapshot`: Read-only committed state that records what it reads
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_core::schema::TableBuilder;
//! use vigil_core::DataType;
//! use vigil_storage::{Query, Snapshot, TableCache, Transaction};
//!
//! let mut cache = TableCache::new();
//! let schema = TableBuilder::new("users")
//!     .unwrap()
//!     .add_rowid_column("id")
//!     .unwrap()
//!     .add_column("name", DataType::Text)
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! let mut tx = Transaction::begin();
//! tx.create_table(&mut cache, schema).unwrap();
//! tx.insert(&mut cache, "users", &[("name", "Alice".into())]).unwrap();
//! let changes = tx.commit().unwrap();
//! assert!(changes.is_full_database());
//!
//! let snapshot = Snapshot::new(Arc::new(cache));
//! let count = snapshot.fetch_count(&Query::select("users")).unwrap();
//! assert_eq!(count, 1);
//! assert_eq!(snapshot.recorded_region().to_string(), "users(*)");
//! ```

pub mod cache;
pub mod connection;
pub mod journal;
pub mod query;
pub mod row_store;
pub mod snapshot;
pub mod transaction;

pub use cache::{Source, TableCache};
pub use connection::Connection;
pub use journal::{Journal, JournalEntry};
pub use query::{Order, Query, Selection};
pub use row_store::RowStore;
pub use snapshot::Snapshot;
pub use transaction::{Transaction, TransactionId, TransactionState};
