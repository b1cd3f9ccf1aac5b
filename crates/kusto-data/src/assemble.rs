//! Turns the v2 frame sequence into the table-event stream consumed by
//! [`crate::dataset::Dataset`] (§4.2).
//!
//! Kept separate from the byte-level streaming in [`crate::stream_decode`] so the
//! state machine -- which frame may legally follow which -- can be exercised with
//! plain in-memory `Frame` values, no async runtime required.

use crate::convert::convert_cell;
use crate::events::RawEvent;
use crate::wire::{Frame, WireColumn, WireOneApiErrors, WireTableFragmentType};
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::model::RowError;
use kusto_core::{Column, Row, TableKind};

fn columns_from_wire(columns: &[WireColumn]) -> Vec<Column> {
    columns
        .iter()
        .map(|c| Column { name: c.column_name.clone(), kind: c.column_type.into() })
        .collect()
}

/// Splits a frame's raw `rows` into data rows and, if the wire attached a trailing
/// `{"OneApiErrors": [...]}` marker object, the row-level errors it carries (§4.2
/// "Error semantics").
fn split_rows(
    op: Operation,
    columns: &[Column],
    raw_rows: Vec<serde_json::Value>,
) -> Result<(Vec<Row>, Vec<RowError>)> {
    let mut rows = Vec::with_capacity(raw_rows.len());
    let mut row_errors = Vec::new();

    for raw in raw_rows {
        match raw {
            serde_json::Value::Array(cells) => {
                if cells.len() != columns.len() {
                    return Err(KustoError::decode(
                        op,
                        format!("row has {} cells, table has {} columns", cells.len(), columns.len()),
                    ));
                }
                let mut values = Vec::with_capacity(cells.len());
                for (cell, col) in cells.iter().zip(columns) {
                    values.push(convert_cell(op, col.kind, cell)?);
                }
                rows.push(Row(values));
            }
            serde_json::Value::Object(_) => {
                let marker: WireOneApiErrors = serde_json::from_value(raw)
                    .map_err(|e| KustoError::decode(op, format!("malformed row-error marker: {e}")))?;
                row_errors.extend(marker.one_api_errors.into_iter().map(|e| RowError {
                    payload: kusto_core::error::ServiceErrorPayload {
                        code: e.error.code,
                        message: e.error.message,
                        error_type: e.error.error_type,
                        at_message: e.error.at_message,
                        context: e.error.context,
                        permanent: e.error.permanent,
                    },
                }));
            }
            other => {
                return Err(KustoError::decode(op, format!("row is neither an array nor an error object: {other}")))
            }
        }
    }

    Ok((rows, row_errors))
}

struct OpenTable {
    columns: Vec<Column>,
    rows_seen: i64,
}

/// Drives the v2 frame state machine. One instance per dataset.
pub struct TableAssembler {
    op: Operation,
    seen_header: bool,
    current: Option<OpenTable>,
    done: bool,
}

impl TableAssembler {
    pub fn new(op: Operation) -> Self {
        TableAssembler { op, seen_header: false, current: None, done: false }
    }

    /// Feeds one frame, returning the events it produces.
    pub fn accept(&mut self, frame: Frame) -> Result<Vec<RawEvent>> {
        if self.done {
            return Err(KustoError::decode(self.op, "frame received after DataSetCompletion"));
        }

        match frame {
            Frame::DataSetHeader(_) => {
                if self.seen_header {
                    return Err(KustoError::decode(self.op, "duplicate DataSetHeader frame"));
                }
                self.seen_header = true;
                Ok(vec![])
            }

            Frame::DataTable(t) => {
                self.require_header()?;
                if self.current.is_some() {
                    return Err(KustoError::decode(self.op, "DataTable frame while another table is open"));
                }
                let columns = columns_from_wire(&t.columns);
                let (rows, row_errors) = split_rows(self.op, &columns, t.rows)?;

                let mut events = vec![RawEvent::TableOpen {
                    id: t.table_id,
                    kind: TableKind::from_wire(&t.table_kind),
                    name: t.table_name,
                    columns,
                }];
                let row_count = rows.len() as i64;
                if !rows.is_empty() {
                    events.push(RawEvent::Rows(rows));
                }
                if !row_errors.is_empty() {
                    events.push(RawEvent::RowErrors(row_errors));
                }
                events.push(RawEvent::TableClose { declared_row_count: Some(row_count) });
                Ok(events)
            }

            Frame::TableHeader(h) => {
                self.require_header()?;
                if self.current.is_some() {
                    return Err(KustoError::decode(self.op, "TableHeader frame while another table is open"));
                }
                let columns = columns_from_wire(&h.columns);
                self.current = Some(OpenTable { columns: columns.clone(), rows_seen: 0 });
                Ok(vec![RawEvent::TableOpen {
                    id: h.table_id,
                    kind: TableKind::from_wire(&h.table_kind),
                    name: h.table_name,
                    columns,
                }])
            }

            Frame::TableFragment(f) => {
                let table = self
                    .current
                    .as_mut()
                    .ok_or_else(|| KustoError::decode(self.op, "TableFragment frame with no open table"))?;

                if f.table_fragment_type == WireTableFragmentType::DataReplace && table.rows_seen > 0 {
                    // Rows already forwarded through dataset.rs's channel-push pipeline
                    // cannot be retracted from a reader who has already consumed them,
                    // so a mid-stream DataReplace can't be honored; the first fragment
                    // of a table is the one case where there's nothing yet to replace.
                    return Err(KustoError::decode(
                        self.op,
                        "DataReplace fragment after rows were already streamed to the caller is not supported",
                    ));
                }

                let (rows, row_errors) = split_rows(self.op, &table.columns, f.rows)?;
                table.rows_seen += rows.len() as i64;

                let mut events = Vec::new();
                if !rows.is_empty() {
                    events.push(RawEvent::Rows(rows));
                }
                if !row_errors.is_empty() {
                    events.push(RawEvent::RowErrors(row_errors));
                }
                Ok(events)
            }

            Frame::TableProgress(_) => Ok(vec![]),

            Frame::TableCompletion(c) => {
                let table = self
                    .current
                    .take()
                    .ok_or_else(|| KustoError::decode(self.op, "TableCompletion frame with no open table"))?;
                if table.rows_seen != c.row_count {
                    tracing::warn!(
                        table_id = c.table_id,
                        declared = c.row_count,
                        observed = table.rows_seen,
                        "table row count did not match TableCompletion"
                    );
                }
                Ok(vec![RawEvent::TableClose { declared_row_count: Some(c.row_count) }])
            }

            Frame::DataSetCompletion(c) => {
                if self.current.is_some() {
                    return Err(KustoError::decode(self.op, "DataSetCompletion frame while a table is still open"));
                }
                self.done = true;
                let dataset_errors = c
                    .one_api_errors
                    .unwrap_or_default()
                    .into_iter()
                    .map(|e| RowError {
                        payload: kusto_core::error::ServiceErrorPayload {
                            code: e.error.code,
                            message: e.error.message,
                            error_type: e.error.error_type,
                            at_message: e.error.at_message,
                            context: e.error.context,
                            permanent: e.error.permanent,
                        },
                    })
                    .collect();
                Ok(vec![RawEvent::Done { has_errors: c.has_errors, cancelled: c.cancelled, dataset_errors }])
            }
        }
    }

    fn require_header(&self) -> Result<()> {
        if !self.seen_header {
            return Err(KustoError::decode(self.op, "frame received before DataSetHeader"));
        }
        Ok(())
    }
}
