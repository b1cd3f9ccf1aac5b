//! Drives bytes off the wire into [`RawEvent`]s (§4.2).
//!
//! The v2 decoder parses the single top-level JSON array frame-by-frame as bytes
//! arrive, using `serde`'s `Visitor`/`SeqAccess` pattern on a blocking thread --
//! `serde_json` has no async streaming mode of its own. This mirrors the buffered,
//! channel-fed consumer the teacher's journal reader uses for gRPC streams, adapted
//! from "one task decodes, pushes onto a bounded channel" to a sync-JSON-over-an-
//! async-bridge version of the same shape.
//!
//! The v1 decoder is the "whole-response" variant §4.2 describes: the body is
//! buffered and parsed once, then its `Tables` array is walked and turned into the
//! same event stream so [`crate::dataset::Dataset`] doesn't need to know which wire
//! version produced it.

use crate::assemble::TableAssembler;
use crate::convert::convert_cell;
use crate::events::RawEvent;
use crate::wire::{Frame, WireColumnType, WireV1Response};
use kusto_core::error::{KustoError, Operation, Result};
use kusto_core::{Column, Row, TableKind};
use serde::de::{Deserializer as _, SeqAccess, Visitor};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FrameSink {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl<'de> Visitor<'de> for FrameSink {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a JSON array of v2 frames")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match seq.next_element::<Frame>()? {
                Some(frame) => {
                    if self.tx.blocking_send(frame).is_err() {
                        // consumer dropped; stop reading but don't fail the parse.
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }
}

/// Parses `reader` as a v2 frame array, feeding each frame through a [`TableAssembler`]
/// and pushing the resulting events onto `events_tx`.
///
/// `io_capacity` bounds how many frames may be buffered ahead of the assembler driving
/// the synchronous parse thread; `io_capacity` of `0` is treated as a capacity of 1
/// (an unbuffered handoff), since `tokio::sync::mpsc` requires capacity >= 1.
pub async fn decode_v2<R>(
    op: Operation,
    reader: R,
    events_tx: mpsc::Sender<RawEvent>,
    io_capacity: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(io_capacity.max(1));
    let bridge_cancel = cancel.clone();

    let parse_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let bridge = tokio_util::io::SyncIoBridge::new(reader);
        let mut de = serde_json::Deserializer::from_reader(bridge);
        de.deserialize_seq(FrameSink { tx: frame_tx, cancel: bridge_cancel })
            .map_err(|e| KustoError::decode(op, format!("malformed v2 frame array: {e}")))
    });

    let mut assembler = TableAssembler::new(op);
    while let Some(frame) = frame_rx.recv().await {
        if cancel.is_cancelled() {
            return Err(KustoError::cancelled(op));
        }
        for event in assembler.accept(frame)? {
            if events_tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    parse_handle
        .await
        .map_err(|e| KustoError::internal(op, format!("frame parser task panicked: {e}")))??;
    Ok(())
}

/// Parses a fully-buffered v1 response body and replays it as the same event stream
/// v2 produces, one table at a time.
pub async fn decode_v1(op: Operation, body: &[u8], events_tx: mpsc::Sender<RawEvent>) -> Result<()> {
    let parsed: WireV1Response =
        serde_json::from_slice(body).map_err(|e| KustoError::decode(op, format!("malformed v1 response: {e}")))?;

    for (idx, table) in parsed.tables.into_iter().enumerate() {
        let columns: Vec<Column> = table
            .columns
            .iter()
            .map(|c| {
                let kind = c
                    .column_type
                    .map(kusto_core::ScalarKind::from)
                    .or_else(|| c.data_type.as_deref().and_then(crate::wire::data_type_to_kind))
                    .ok_or_else(|| {
                        KustoError::decode(op, format!("column {} has neither ColumnType nor a recognized DataType", c.column_name))
                    })?;
                Ok(Column { name: c.column_name.clone(), kind })
            })
            .collect::<Result<_>>()?;

        let mut rows = Vec::with_capacity(table.rows.len());
        for raw_row in table.rows {
            if raw_row.len() != columns.len() {
                return Err(KustoError::decode(
                    op,
                    format!("row has {} cells, table has {} columns", raw_row.len(), columns.len()),
                ));
            }
            let mut values = Vec::with_capacity(raw_row.len());
            for (cell, col) in raw_row.iter().zip(&columns) {
                values.push(convert_cell(op, col.kind, cell)?);
            }
            rows.push(Row(values));
        }

        let row_count = rows.len() as i64;
        if events_tx
            .send(RawEvent::TableOpen {
                id: idx as i64,
                kind: TableKind::from_wire(&table.table_name),
                name: table.table_name,
                columns,
            })
            .await
            .is_err()
        {
            return Ok(());
        }
        if !rows.is_empty() && events_tx.send(RawEvent::Rows(rows)).await.is_err() {
            return Ok(());
        }
        if events_tx.send(RawEvent::TableClose { declared_row_count: Some(row_count) }).await.is_err() {
            return Ok(());
        }
    }

    let _ = events_tx.send(RawEvent::Done { has_errors: false, cancelled: false, dataset_errors: vec![] }).await;
    Ok(())
}
