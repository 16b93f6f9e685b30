//! Select queries over tables and views.
//!
//! A `Query` is a small relational request: one source (a table or a view),
//! a projection or a row count, equality filters, ordering and a limit. Its
//! main job besides producing rows is to tell which region of the database
//! it depends on.
//!
//! ```rust
//! use vigil_storage::Query;
//!
//! let query = Query::select("player")
//!     .columns(["name"])
//!     .filter_eq("team", "red")
//!     .order_by("score")
//!     .limit(10);
//! assert_eq!(query.source(), "player");
//! ```

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use vigil_core::schema::Table;
use vigil_core::{Error, Region, Result, Row, RowId, Value};

use crate::cache::{Source, TableCache};
use crate::row_store::RowStore;

/// Sort direction of an ORDER BY term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// What a query returns.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// `SELECT *`
    All,
    /// `SELECT a, b, ...`
    Columns(Vec<String>),
    /// `SELECT COUNT(*)`
    Count,
}

/// A select query.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    source: String,
    selection: Selection,
    rowids: Option<BTreeSet<RowId>>,
    filters: Vec<(String, Value)>,
    order_by: Vec<(String, Order)>,
    limit: Option<usize>,
}

/// A query resolved against a schema.
struct Plan<'a> {
    store: &'a RowStore,
    /// Name of the view, for view sources.
    view: Option<&'a str>,
    /// Columns visible through the source, in order.
    visible: Vec<String>,
}

impl Query {
    /// Starts a `SELECT * FROM source` query.
    pub fn select(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            selection: Selection::All,
            rowids: None,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Selects the given columns, in order.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = Selection::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Turns the query into `SELECT COUNT(*)`.
    pub fn count(mut self) -> Self {
        self.selection = Selection::Count;
        self
    }

    /// Restricts the query to rows with the given rowids.
    pub fn filter_rowids<I>(mut self, rowids: I) -> Self
    where
        I: IntoIterator<Item = RowId>,
    {
        let rowids: BTreeSet<RowId> = rowids.into_iter().collect();
        self.rowids = Some(match self.rowids.take() {
            Some(current) => current.intersection(&rowids).copied().collect(),
            None => rowids,
        });
        self
    }

    /// Adds a `column = value` filter.
    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Adds an ascending ORDER BY term.
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), Order::Asc));
        self
    }

    /// Adds a descending ORDER BY term.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order_by.push((column.into(), Order::Desc));
        self
    }

    /// Limits the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the table or view the query reads from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the selection.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Returns true for `COUNT(*)` queries.
    pub fn is_count(&self) -> bool {
        self.selection == Selection::Count
    }

    fn plan<'a>(&self, cache: &'a TableCache) -> Result<Plan<'a>> {
        let plan = match cache.source(&self.source)? {
            Source::Table(store) => Plan {
                store,
                view: None,
                visible: store
                    .schema()
                    .column_names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
            Source::View(view, store) => Plan {
                store,
                view: Some(view.name()),
                visible: view.resolve_columns(store.schema())?,
            },
        };
        for column in self.referenced_columns(&plan) {
            if !plan.visible.contains(&column) {
                return Err(Error::column_not_found(&self.source, column));
            }
        }
        Ok(plan)
    }

    /// Columns the query reads, by source column name.
    fn referenced_columns(&self, plan: &Plan<'_>) -> BTreeSet<String> {
        let mut columns: BTreeSet<String> = match &self.selection {
            Selection::All => plan.visible.iter().cloned().collect(),
            Selection::Columns(columns) => columns.iter().cloned().collect(),
            Selection::Count => BTreeSet::new(),
        };
        columns.extend(self.filters.iter().map(|(column, _)| column.clone()));
        columns.extend(self.order_by.iter().map(|(column, _)| column.clone()));
        if self.rowids.is_some() {
            if let Some(alias) = rowid_alias_name(plan.store.schema()) {
                if plan.visible.iter().any(|c| c == alias) {
                    columns.insert(alias.to_string());
                }
            }
        }
        columns
    }

    fn table_region(&self, table: &str, columns: &BTreeSet<String>) -> Region {
        let region = if self.is_count() {
            Region::table(table)
        } else {
            Region::columns(table, columns.iter().cloned())
        };
        match &self.rowids {
            Some(rowids) => region.with_rowids(table, rowids.iter().copied()),
            None => region,
        }
    }

    /// Returns the declared region of the query.
    ///
    /// Queries on a view depend on both the view and its base table.
    pub fn region(&self, cache: &TableCache) -> Result<Region> {
        let plan = self.plan(cache)?;
        let columns = self.referenced_columns(&plan);
        let base = self.table_region(plan.store.schema().name(), &columns);
        Ok(match plan.view {
            Some(view) => self.table_region(view, &columns).union(&base),
            None => base,
        })
    }

    /// Returns the region of base tables the query actually reads.
    pub fn observed_region(&self, cache: &TableCache) -> Result<Region> {
        let plan = self.plan(cache)?;
        let columns = self.referenced_columns(&plan);
        Ok(self.table_region(plan.store.schema().name(), &columns))
    }

    /// Runs the query.
    ///
    /// Count queries return a single computed row holding the count.
    pub fn execute(&self, cache: &TableCache) -> Result<Vec<Row>> {
        let plan = self.plan(cache)?;
        let schema = plan.store.schema();

        let filters = self
            .filters
            .iter()
            .map(|(column, value)| Ok((schema.require_column_index(column)?, value)))
            .collect::<Result<Vec<_>>>()?;

        let mut rows: Vec<&Arc<Row>> = match &self.rowids {
            Some(rowids) => rowids
                .iter()
                .filter_map(|rowid| plan.store.get_ref(*rowid))
                .collect(),
            None => plan.store.scan().collect(),
        };
        rows.retain(|row| {
            filters
                .iter()
                .all(|(index, value)| row.get(*index) == Some(*value))
        });

        if self.is_count() {
            return Ok(vec![Row::computed(vec![Value::Integer(rows.len() as i64)])]);
        }

        if !self.order_by.is_empty() {
            let terms = self
                .order_by
                .iter()
                .map(|(column, order)| Ok((schema.require_column_index(column)?, *order)))
                .collect::<Result<Vec<_>>>()?;
            // Stable: ties keep rowid order.
            rows.sort_by(|a, b| compare_rows(a, b, &terms));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        let projection = match &self.selection {
            Selection::Columns(columns) => columns
                .iter()
                .map(|column| schema.require_column_index(column))
                .collect::<Result<Vec<_>>>()?,
            _ => plan
                .visible
                .iter()
                .map(|column| schema.require_column_index(column))
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(rows
            .into_iter()
            .map(|row| project(row, &projection))
            .collect())
    }
}

fn rowid_alias_name(schema: &Table) -> Option<&str> {
    schema
        .rowid_alias()
        .and_then(|index| schema.columns().get(index))
        .map(|column| column.name())
}

fn compare_rows(a: &Row, b: &Row, terms: &[(usize, Order)]) -> Ordering {
    for (index, order) in terms {
        let ordering = a.get(*index).cmp(&b.get(*index));
        let ordering = match order {
            Order::Asc => ordering,
            Order::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(row: &Row, projection: &[usize]) -> Row {
    let values = projection
        .iter()
        .map(|index| row.get(*index).cloned().unwrap_or(Value::Null))
        .collect();
    Row::new(row.id(), values)
}
