//! Database regions.
//!
//! A `Region` describes the part of the database a query depends on, or the
//! part a write transaction has modified. It is a set of
//! `(table, columns, rowids)` triples where both the column set and the rowid
//! set may be a wildcard, plus the distinguished *full database* region which
//! overlaps everything non-empty.
//!
//! The only question the observation layer asks of regions is
//! [`Region::is_modified_by`]: did a transaction's changed region overlap the
//! region an observation reads?
//!
//! ```rust
//! use vigil_core::Region;
//!
//! let observed = Region::columns("player", ["name", "score"]);
//!
//! // An update of player.score on row 3
//! let changes = Region::columns("player", ["score"]).with_rowids("player", [3]);
//! assert!(observed.is_modified_by(&changes));
//!
//! // An update of an unrelated column does not matter
//! let changes = Region::columns("player", ["team"]);
//! assert!(!observed.is_modified_by(&changes));
//!
//! assert_eq!(observed.to_string(), "player(name,score)");
//! ```

use crate::row::RowId;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use core::fmt;

/// The columns and rows of a single table within a region.
///
/// `None` stands for the wildcard: any column, or any row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableRegion {
    columns: Option<BTreeSet<String>>,
    rowids: Option<BTreeSet<RowId>>,
}

impl TableRegion {
    /// All columns, all rows.
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns the tracked columns, or `None` for any column.
    pub fn columns(&self) -> Option<&BTreeSet<String>> {
        self.columns.as_ref()
    }

    /// Returns the tracked rowids, or `None` for any row.
    pub fn rowids(&self) -> Option<&BTreeSet<RowId>> {
        self.rowids.as_ref()
    }

    fn union(&mut self, other: &TableRegion) {
        self.columns = union_sets(self.columns.take(), &other.columns);
        self.rowids = union_sets(self.rowids.take(), &other.rowids);
    }

    /// Returns the overlap of two table regions, or `None` if they are
    /// disjoint.
    fn intersection(&self, other: &TableRegion) -> Option<TableRegion> {
        let columns = intersect_sets(&self.columns, &other.columns)?;
        let rowids = intersect_sets(&self.rowids, &other.rowids)?;
        Some(TableRegion { columns, rowids })
    }

    fn is_empty(&self) -> bool {
        matches!(&self.columns, Some(c) if c.is_empty()) || matches!(&self.rowids, Some(r) if r.is_empty())
    }
}

fn union_sets<T: Ord + Clone>(
    lhs: Option<BTreeSet<T>>,
    rhs: &Option<BTreeSet<T>>,
) -> Option<BTreeSet<T>> {
    match (lhs, rhs) {
        (Some(mut lhs), Some(rhs)) => {
            lhs.extend(rhs.iter().cloned());
            Some(lhs)
        }
        _ => None,
    }
}

/// `Some(None)` is a wildcard overlap, `None` means the sets are disjoint.
fn intersect_sets<T: Ord + Clone>(
    lhs: &Option<BTreeSet<T>>,
    rhs: &Option<BTreeSet<T>>,
) -> Option<Option<BTreeSet<T>>> {
    let set = match (lhs, rhs) {
        (None, None) => return Some(None),
        (Some(set), None) | (None, Some(set)) => set.clone(),
        (Some(lhs), Some(rhs)) => lhs.intersection(rhs).cloned().collect(),
    };
    if set.is_empty() {
        None
    } else {
        Some(Some(set))
    }
}

/// A set of tables, columns and rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    full_database: bool,
    tables: BTreeMap<String, TableRegion>,
}

impl Region {
    /// The empty region. It is modified by nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The full database. Schema changes report this region.
    pub fn full_database() -> Self {
        Self {
            full_database: true,
            tables: BTreeMap::new(),
        }
    }

    /// Every column and row of a table.
    pub fn table(name: impl Into<String>) -> Self {
        let mut region = Self::empty();
        region.tables.insert(name.into(), TableRegion::all());
        region
    }

    /// Some columns of a table, every row.
    pub fn columns<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut region = Self::empty();
        region.tables.insert(
            table.into(),
            TableRegion {
                columns: Some(columns.into_iter().map(Into::into).collect()),
                rowids: None,
            },
        );
        region
    }

    /// Restricts the rows tracked for `table` to `rowids`.
    ///
    /// The table is added with all columns if it is not part of the region yet.
    pub fn with_rowids<I>(mut self, table: &str, rowids: I) -> Self
    where
        I: IntoIterator<Item = RowId>,
    {
        if self.full_database {
            return self;
        }
        let entry = self.tables.entry(table.into()).or_default();
        entry.rowids = Some(rowids.into_iter().collect());
        self
    }

    /// Returns true if this is the full database region.
    #[inline]
    pub fn is_full_database(&self) -> bool {
        self.full_database
    }

    /// Returns true if the region contains nothing.
    pub fn is_empty(&self) -> bool {
        !self.full_database && self.tables.values().all(TableRegion::is_empty)
    }

    /// Returns the table region for `table`, if the region mentions it.
    pub fn table_region(&self, table: &str) -> Option<&TableRegion> {
        self.tables.get(table)
    }

    /// Iterates over the tables of the region, in name order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Returns the union of two regions.
    pub fn union(&self, other: &Region) -> Region {
        let mut region = self.clone();
        region.form_union(other);
        region
    }

    /// Extends this region with `other`.
    pub fn form_union(&mut self, other: &Region) {
        if self.full_database {
            return;
        }
        if other.full_database {
            *self = Region::full_database();
            return;
        }
        for (table, other_region) in &other.tables {
            match self.tables.get_mut(table) {
                Some(region) => region.union(other_region),
                None => {
                    self.tables.insert(table.clone(), other_region.clone());
                }
            }
        }
    }

    /// Returns the overlap of two regions.
    pub fn intersection(&self, other: &Region) -> Region {
        if self.full_database {
            return other.clone();
        }
        if other.full_database {
            return self.clone();
        }
        let tables = self
            .tables
            .iter()
            .filter_map(|(table, lhs)| {
                let rhs = other.tables.get(table)?;
                lhs.intersection(rhs).map(|region| (table.clone(), region))
            })
            .collect();
        Region {
            full_database: false,
            tables,
        }
    }

    /// Returns true if a transaction that changed `changes` may have modified
    /// the values read from this region.
    pub fn is_modified_by(&self, changes: &Region) -> bool {
        if self.is_empty() || changes.is_empty() {
            return false;
        }
        !self.intersection(changes).is_empty()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full_database {
            return f.write_str("full database");
        }
        if self.tables.is_empty() {
            return f.write_str("empty");
        }
        for (i, (table, region)) in self.tables.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(table)?;
            match &region.columns {
                None => f.write_str("(*)")?,
                Some(columns) => {
                    f.write_str("(")?;
                    for (j, column) in columns.iter().enumerate() {
                        if j > 0 {
                            f.write_str(",")?;
                        }
                        f.write_str(column)?;
                    }
                    f.write_str(")")?;
                }
            }
            if let Some(rowids) = &region.rowids {
                f.write_str("[")?;
                for (j, rowid) in rowids.iter().enumerate() {
                    if j > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", rowid)?;
                }
                f.write_str("]")?;
            }
        }
        Ok(())
    }
}
