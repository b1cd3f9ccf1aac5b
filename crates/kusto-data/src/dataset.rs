//! The iterative, cancellation-aware dataset built from the frame/event stream (§4.3).
//!
//! Consumers step through tables, then rows within a table, without the decoder ever
//! materializing more of the response than the consumer has asked for -- the channel
//! capacities below are exactly the backpressure knobs a caller tunes for a given
//! response size.

use crate::events::RawEvent;
use crate::stream_decode::{decode_v1, decode_v2};
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::model::RowError;
use kusto_core::{Column, Row, Table, TableKind};
use std::collections::VecDeque;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Bounds how far ahead of the consumer the decoder is allowed to run (§4.3).
/// A capacity of `0` collapses to an unbuffered, fully synchronous handoff.
#[derive(Debug, Clone, Copy)]
pub struct DatasetOptions {
    /// Bytes the async-to-sync bridge may read ahead of the frame parser.
    pub io_capacity: usize,
    /// Frames/table-events buffered between the decoder and the consumer.
    pub fragment_capacity: usize,
    /// Rows buffered ahead of the consumer within the currently open table.
    pub row_capacity: usize,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        DatasetOptions { io_capacity: 64 * 1024, fragment_capacity: 4, row_capacity: 256 }
    }
}

/// A table's identity and shape, known as soon as its header frame arrives.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub id: i64,
    pub kind: TableKind,
    pub name: String,
    pub columns: Vec<Column>,
}

/// Dataset-level completion info, available once the whole stream has been consumed.
#[derive(Debug, Clone)]
pub struct DatasetCompletion {
    pub has_errors: bool,
    pub cancelled: bool,
    pub errors: Vec<RowError>,
}

enum DState {
    AwaitingTable,
    InTable { meta: TableMeta, closed: bool },
    Finished,
}

pub struct Dataset {
    op: Operation,
    events_rx: mpsc::Receiver<RawEvent>,
    decode_result: Option<oneshot::Receiver<Result<()>>>,
    state: DState,
    row_buf: VecDeque<Row>,
    row_errors: Vec<RowError>,
    completion: Option<DatasetCompletion>,
}

impl Dataset {
    pub fn from_v2_reader<R>(op: Operation, reader: R, opts: DatasetOptions, cancel: CancellationToken) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(opts.fragment_capacity.max(1));
        let (result_tx, result_rx) = oneshot::channel();
        let io_capacity = opts.io_capacity;
        tokio::spawn(async move {
            let res = decode_v2(op, reader, events_tx, io_capacity, cancel).await;
            let _ = result_tx.send(res);
        });

        Dataset {
            op,
            events_rx,
            decode_result: Some(result_rx),
            state: DState::AwaitingTable,
            row_buf: VecDeque::new(),
            row_errors: Vec::new(),
            completion: None,
        }
    }

    pub fn from_v1_body(op: Operation, body: Vec<u8>, opts: DatasetOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(opts.fragment_capacity.max(1));
        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(async move {
            let res = decode_v1(op, &body, events_tx).await;
            let _ = result_tx.send(res);
        });

        Dataset {
            op,
            events_rx,
            decode_result: Some(result_rx),
            state: DState::AwaitingTable,
            row_buf: VecDeque::new(),
            row_errors: Vec::new(),
            completion: None,
        }
    }

    /// Pulls the next raw event, resolving the decode task's terminal `Result` once
    /// the event channel has drained, so a decode failure is never silently swallowed
    /// as "dataset exhausted".
    async fn pull_event(&mut self) -> Option<Result<RawEvent>> {
        match self.events_rx.recv().await {
            Some(event) => Some(Ok(event)),
            None => {
                let outcome = match self.decode_result.take() {
                    Some(rx) => rx.await.unwrap_or_else(|_| {
                        Err(KustoError::internal(self.op, "decode task dropped without a result"))
                    }),
                    None => Ok(()),
                };
                match outcome {
                    Ok(()) => None,
                    Err(e) => Some(Err(e)),
                }
            }
        }
    }

    /// Advances to the next table, discarding any unread rows of the current one.
    /// Returns `None` once the dataset is exhausted.
    pub async fn next_table(&mut self) -> Option<Result<TableMeta>> {
        if matches!(self.state, DState::Finished) {
            return None;
        }

        if let DState::InTable { closed, .. } = &self.state {
            if !*closed {
                if let Err(e) = self.drain_to_table_close().await {
                    self.state = DState::Finished;
                    return Some(Err(e));
                }
            }
        }

        loop {
            match self.pull_event().await {
                None => {
                    self.state = DState::Finished;
                    return None;
                }
                Some(Err(e)) => {
                    self.state = DState::Finished;
                    return Some(Err(e));
                }
                Some(Ok(RawEvent::TableOpen { id, kind, name, columns })) => {
                    let meta = TableMeta { id, kind, name, columns };
                    self.row_buf.clear();
                    self.row_errors.clear();
                    self.state = DState::InTable { meta: meta.clone(), closed: false };
                    return Some(Ok(meta));
                }
                Some(Ok(RawEvent::Done { has_errors, cancelled, dataset_errors })) => {
                    self.completion = Some(DatasetCompletion { has_errors, cancelled, errors: dataset_errors });
                    continue;
                }
                Some(Ok(other)) => {
                    self.state = DState::Finished;
                    return Some(Err(KustoError::internal(
                        self.op,
                        format!("unexpected event while awaiting a table: {other:?}"),
                    )));
                }
            }
        }
    }

    async fn drain_to_table_close(&mut self) -> Result<()> {
        loop {
            match self.pull_event().await {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok(RawEvent::TableClose { .. })) => {
                    if let DState::InTable { closed, .. } = &mut self.state {
                        *closed = true;
                    }
                    return Ok(());
                }
                Some(Ok(RawEvent::Rows(_))) | Some(Ok(RawEvent::RowErrors(_))) => continue,
                Some(Ok(RawEvent::Done { has_errors, cancelled, dataset_errors })) => {
                    self.completion = Some(DatasetCompletion { has_errors, cancelled, errors: dataset_errors });
                    return Ok(());
                }
                Some(Ok(other)) => {
                    return Err(KustoError::internal(self.op, format!("unexpected event mid-table: {other:?}")))
                }
            }
        }
    }

    /// Pulls the next row of the table opened by the most recent [`Dataset::next_table`]
    /// call. Returns `None` once that table is fully consumed.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        if let Some(row) = self.row_buf.pop_front() {
            return Some(Ok(row));
        }

        loop {
            let closed = matches!(self.state, DState::InTable { closed: true, .. });
            if closed {
                return None;
            }
            if !matches!(self.state, DState::InTable { .. }) {
                return None;
            }

            match self.pull_event().await {
                None => {
                    self.state = DState::Finished;
                    return None;
                }
                Some(Err(e)) => {
                    self.state = DState::Finished;
                    return Some(Err(e));
                }
                Some(Ok(RawEvent::Rows(mut rows))) => {
                    if rows.is_empty() {
                        continue;
                    }
                    let first = rows.remove(0);
                    self.row_buf.extend(rows);
                    return Some(Ok(first));
                }
                Some(Ok(RawEvent::RowErrors(errs))) => {
                    self.row_errors.extend(errs);
                    continue;
                }
                Some(Ok(RawEvent::TableClose { .. })) => {
                    if let DState::InTable { closed, .. } = &mut self.state {
                        *closed = true;
                    }
                    return None;
                }
                Some(Ok(RawEvent::Done { has_errors, cancelled, dataset_errors })) => {
                    self.completion = Some(DatasetCompletion { has_errors, cancelled, errors: dataset_errors });
                    continue;
                }
                Some(Ok(other)) => {
                    self.state = DState::Finished;
                    return Some(Err(KustoError::internal(
                        self.op,
                        format!("unexpected event while reading rows: {other:?}"),
                    )));
                }
            }
        }
    }

    /// Row-level errors attached to the table most recently opened by `next_table`
    /// (§4.2 "Error semantics"). Meaningful once that table's rows are exhausted.
    pub fn current_table_row_errors(&self) -> &[RowError] {
        &self.row_errors
    }

    /// Dataset-level completion info. `None` until the stream has been fully drained.
    pub fn completion(&self) -> Option<&DatasetCompletion> {
        self.completion.as_ref()
    }

    /// Materializes the entire dataset into memory (§4.3's `to_full_dataset`),
    /// for callers who don't need incremental consumption.
    pub async fn to_full_dataset(mut self) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        while let Some(meta) = self.next_table().await {
            let meta = meta?;
            let mut rows = Vec::new();
            while let Some(row) = self.next_row().await {
                rows.push(row?);
            }
            tables.push(Table {
                id: meta.id,
                kind: meta.kind,
                name: meta.name,
                columns: meta.columns,
                rows,
                row_errors: self.row_errors.clone(),
            });
        }
        Ok(tables)
    }
}
