//! Columns, rows, and tables (§3) -- the shapes the frame decoder builds and the
//! iterative dataset hands to callers.

use crate::value::{ScalarKind, Value};
use std::collections::HashMap;

/// `(name, kind)`. Names are unique within a table; order is significant (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ScalarKind,
}

/// An ordered sequence of scalar values; length equals the owning table's column count (§3).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Categorizes data tables according to the role they play in a query's dataset (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    PrimaryResult,
    QueryCompletionInformation,
    QueryTraceLog,
    QueryPerfLog,
    TableOfContents,
    QueryProperties,
    QueryPlan,
    Unknown,
}

impl TableKind {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "PrimaryResult" => TableKind::PrimaryResult,
            "QueryCompletionInformation" => TableKind::QueryCompletionInformation,
            "QueryTraceLog" => TableKind::QueryTraceLog,
            "QueryPerfLog" => TableKind::QueryPerfLog,
            "TableOfContents" => TableKind::TableOfContents,
            "QueryProperties" => TableKind::QueryProperties,
            "QueryPlan" => TableKind::QueryPlan,
            _ => TableKind::Unknown,
        }
    }
}

/// A structured error attached to a specific table, non-fatal to the rest of the
/// dataset (§4.2 "Error semantics").
#[derive(Debug, Clone)]
pub struct RowError {
    pub payload: crate::error::ServiceErrorPayload,
}

/// A fully materialized table: `(id, kind, name, columns, rows, row_errors)` (§3).
///
/// This is the shape `to_full_dataset()` (§4.3) produces. The streaming path
/// (`kusto-data`) builds one of these incrementally as frames arrive.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub id: i64,
    pub kind: TableKind,
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub row_errors: Vec<RowError>,
}

impl Default for TableKind {
    fn default() -> Self {
        TableKind::Unknown
    }
}

impl Table {
    pub fn column_index(&self) -> HashMap<&str, usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect()
    }
}

/// Maps a `Row` into a caller-declared record type without per-row reflection (§3.1,
/// §9 "Reflection-based struct binding"). A `RowMapper` is built once per table, after
/// the table's columns are known, and then applied to every row of that table.
pub trait TryFromRow: Sized {
    /// Column names this type binds, in the order `from_row` expects them.
    fn field_names() -> &'static [&'static str];

    /// Construct `Self` from values already reordered to match `field_names()`.
    fn from_row(values: &[Option<&Value>]) -> crate::error::Result<Self>;
}

/// Resolves `T::field_names()` against a table's columns exactly once, then converts
/// each row with a plain index lookup -- no per-row name resolution.
pub struct RowMapper<T> {
    indices: Vec<Option<usize>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: TryFromRow> RowMapper<T> {
    pub fn new(columns: &[Column]) -> Self {
        let by_name: HashMap<&str, usize> =
            columns.iter().enumerate().map(|(i, c)| (c.name.as_str(), i)).collect();

        let indices = T::field_names().iter().map(|name| by_name.get(name).copied()).collect();

        RowMapper { indices, _marker: std::marker::PhantomData }
    }

    pub fn map(&self, row: &Row) -> crate::error::Result<T> {
        let values: Vec<Option<&Value>> =
            self.indices.iter().map(|idx| idx.and_then(|i| row.get(i))).collect();
        T::from_row(&values)
    }
}
