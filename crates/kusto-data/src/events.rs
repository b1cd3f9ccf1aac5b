//! The table-event stream the assembler produces and the [`crate::dataset::Dataset`]
//! consumes (§4.2, §4.3).

use kusto_core::{Column, RowError, TableKind};

/// One step of dataset assembly, in wire order.
#[derive(Debug)]
pub enum RawEvent {
    /// A table has started: its columns are known, no rows yet.
    TableOpen { id: i64, kind: TableKind, name: String, columns: Vec<Column> },
    /// A batch of rows for the currently open table.
    Rows(Vec<kusto_core::Row>),
    /// Row-level service errors attached to the currently open table (§4.2 "Error
    /// semantics"); non-fatal to the rest of the dataset.
    RowErrors(Vec<RowError>),
    /// The currently open table is complete. `declared_row_count` is the server's own
    /// count, compared against the rows actually observed as a warning, never a hard
    /// failure (§4.2 "RowCount mismatch").
    TableClose { declared_row_count: Option<i64> },
    /// The dataset as a whole is done.
    Done { has_errors: bool, cancelled: bool, dataset_errors: Vec<RowError> },
}
