//! Framed read and write streams
//!
//! Read: `estimate batch size -> (pull -> encode -> send)* -> empty frame if
//! nothing was sent -> EOF`. Write: `(receive -> decode -> merge per table)*
//! -> EOF`. A write stream that ends without `EOF` is rejected whole.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info};

use polygate_bridge::codec::CoercionPolicy;
use polygate_bridge::reader::CursorReader;
use polygate_bridge::sizer::BatchSizer;
use polygate_bridge::type_bridge::TypeBridge;
use polygate_bridge::wire::{decode_frame, encode_batch, encode_empty, eof_frame, is_eof, Frame};
use polygate_rdbc::connection::RowStream;

use crate::error::{GatewayError, Result};
use crate::proto::{ConnectionProfile, WireBatch};

/// Parameters of one read stream
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub bridge: TypeBridge,
    pub sizer: BatchSizer,
    pub batch_rows: usize,
    pub policy: CoercionPolicy,
}

/// Outcome of [`send_frames`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// All rows and the EOF frame were sent
    Complete { rows: u64, frames: usize },
    /// The receiver went away mid-stream
    Cancelled { rows: u64 },
}

/// Drain `stream` into frames on `tx`.
///
/// When `expected_rows` is set the total sent must match it; a mismatch is
/// an error and no EOF is sent.
pub async fn send_frames(
    stream: Box<dyn RowStream>,
    table: &str,
    options: ReadOptions,
    expected_rows: Option<u64>,
    tx: &mpsc::Sender<std::result::Result<WireBatch, Status>>,
) -> Result<ReadOutcome> {
    let mut reader = CursorReader::new(
        stream,
        &options.bridge,
        &options.sizer,
        options.batch_rows,
        options.policy,
    );
    let frame = |payload| WireBatch {
        table: table.to_string(),
        payload,
        connection: None,
        create_table: false,
    };

    let mut frames = 0;
    while let Some(batch) = reader.next_batch().await? {
        let payload = encode_batch(&batch)?;
        debug!(table, rows = batch.num_rows(), bytes = payload.len(), "Sending frame");
        if tx.send(Ok(frame(payload))).await.is_err() {
            return Ok(ReadOutcome::Cancelled {
                rows: reader.rows_read(),
            });
        }
        frames += 1;
    }

    let rows = reader.rows_read();
    if let Some(expected) = expected_rows {
        if rows != expected {
            return Err(GatewayError::RowCountMismatch {
                table: table.to_string(),
                sent: rows,
                expected,
            });
        }
    }

    if frames == 0 {
        if tx.send(Ok(frame(encode_empty()?))).await.is_err() {
            return Ok(ReadOutcome::Cancelled { rows });
        }
        frames = 1;
    }
    if tx.send(Ok(frame(eof_frame()))).await.is_err() {
        return Ok(ReadOutcome::Cancelled { rows });
    }
    info!(table, rows, frames, "Read stream complete");
    Ok(ReadOutcome::Complete { rows, frames })
}

/// Frames collected for one destination table
#[derive(Debug, Clone)]
pub struct TableBatches {
    pub table: String,
    pub connection: ConnectionProfile,
    pub create_table: bool,
    pub schema: Option<SchemaRef>,
    pub batches: Vec<RecordBatch>,
}

impl TableBatches {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Read a write stream up to its EOF frame, merging frames per table in
/// first-seen order.
///
/// A frame without a connection inherits the most recent one in the stream.
pub async fn collect_write_frames<S>(mut frames: S) -> Result<Vec<TableBatches>>
where
    S: Stream<Item = std::result::Result<WireBatch, Status>> + Unpin,
{
    let mut tables: Vec<TableBatches> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut connection: Option<ConnectionProfile> = None;

    loop {
        let Some(next) = frames.next().await else {
            return Err(GatewayError::invalid_request(
                "write stream closed without an EOF frame",
            ));
        };
        let wire = next.map_err(|s| {
            GatewayError::invalid_request(format!("write stream failed: {}", s.message()))
        })?;
        if is_eof(&wire.payload) {
            break;
        }
        if wire.table.is_empty() {
            return Err(GatewayError::invalid_request("frame is missing its table"));
        }
        if wire.connection.is_some() {
            connection = wire.connection.clone();
        }

        let slot = match index.get(&wire.table) {
            Some(&i) => i,
            None => {
                let Some(conn) = connection.clone() else {
                    return Err(GatewayError::invalid_request(format!(
                        "first frame for {} carries no connection",
                        wire.table
                    )));
                };
                tables.push(TableBatches {
                    table: wire.table.clone(),
                    connection: conn,
                    create_table: false,
                    schema: None,
                    batches: Vec::new(),
                });
                index.insert(wire.table.clone(), tables.len() - 1);
                tables.len() - 1
            }
        };
        let entry = &mut tables[slot];
        entry.create_table |= wire.create_table;

        let Frame::Batches { schema, batches } = decode_frame(&wire.payload)? else {
            continue;
        };
        if schema.fields().is_empty() {
            continue;
        }
        if let Some(existing) = &entry.schema {
            if existing.fields() != schema.fields() {
                return Err(GatewayError::invalid_request(format!(
                    "frames for {} disagree on schema",
                    entry.table
                )));
            }
        } else {
            entry.schema = Some(schema);
        }
        entry.batches.extend(batches.into_iter().filter(|b| b.num_rows() > 0));
    }

    Ok(tables)
}
