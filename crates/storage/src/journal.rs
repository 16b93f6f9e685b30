//! Journal for tracking changes made by a write transaction.
//!
//! Every mutation a `Transaction` applies to the cache is recorded here, so
//! that the transaction can be rolled back, and so that a committed
//! transaction can report the region of the database it modified.

use std::sync::Arc;

use vigil_core::schema::View;
use vigil_core::{Region, Row, RowId};

use crate::cache::TableCache;
use crate::row_store::RowStore;

/// A single journal entry representing a change.
#[derive(Clone, Debug)]
pub enum JournalEntry {
    /// A row was inserted.
    Insert { table: String, rowid: RowId },
    /// Some columns of a row were updated.
    Update {
        table: String,
        columns: Vec<String>,
        old: Arc<Row>,
    },
    /// A row was deleted.
    Delete { table: String, row: Arc<Row> },
    /// A table was created.
    CreateTable { name: String },
    /// A table was dropped.
    DropTable { store: RowStore },
    /// A view was created.
    CreateView { name: String },
    /// A view was dropped.
    DropView { view: View },
}

impl JournalEntry {
    /// Returns true for entries that change the schema.
    pub fn is_schema_change(&self) -> bool {
        matches!(
            self,
            JournalEntry::CreateTable { .. }
                | JournalEntry::DropTable { .. }
                | JournalEntry::CreateView { .. }
                | JournalEntry::DropView { .. }
        )
    }

    /// Returns the region this entry modified.
    pub fn region(&self) -> Region {
        match self {
            JournalEntry::Insert { table, rowid } => {
                Region::table(table.as_str()).with_rowids(table, [*rowid])
            }
            JournalEntry::Update {
                table,
                columns,
                old,
            } => Region::columns(table.as_str(), columns.iter().map(String::as_str))
                .with_rowids(table, [old.id()]),
            JournalEntry::Delete { table, row } => {
                Region::table(table.as_str()).with_rowids(table, [row.id()])
            }
            // Column and row tracking is unsound across schema changes.
            _ => Region::full_database(),
        }
    }
}

/// Ordered record of the changes made by one transaction.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Creates a new empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, table: &str, rowid: RowId) {
        self.entries.push(JournalEntry::Insert {
            table: table.into(),
            rowid,
        });
    }

    pub fn record_update(&mut self, table: &str, columns: Vec<String>, old: Arc<Row>) {
        self.entries.push(JournalEntry::Update {
            table: table.into(),
            columns,
            old,
        });
    }

    pub fn record_delete(&mut self, table: &str, row: Arc<Row>) {
        self.entries.push(JournalEntry::Delete {
            table: table.into(),
            row,
        });
    }

    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Returns the recorded entries.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Returns true if no change was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the union of the regions modified by every entry.
    pub fn changed_region(&self) -> Region {
        let mut region = Region::empty();
        for entry in &self.entries {
            if entry.is_schema_change() {
                return Region::full_database();
            }
            region.form_union(&entry.region());
        }
        region
    }

    /// Reverts every recorded change, newest first.
    pub fn rollback(&mut self, cache: &mut TableCache) {
        for entry in self.entries.drain(..).rev() {
            match entry {
                JournalEntry::Insert { table, rowid } => {
                    if let Some(store) = cache.get_table_mut(&table) {
                        let _ = store.delete(rowid);
                    }
                }
                JournalEntry::Update { table, old, .. } | JournalEntry::Delete { table, row: old } => {
                    if let Some(store) = cache.get_table_mut(&table) {
                        store.restore(old);
                    }
                }
                JournalEntry::CreateTable { name } => {
                    let _ = cache.drop_table(&name);
                }
                JournalEntry::DropTable { store } => cache.restore_table(store),
                JournalEntry::CreateView { name } => {
                    let _ = cache.drop_view(&name);
                }
                JournalEntry::DropView { view } => cache.restore_view(view),
            }
        }
    }
}
