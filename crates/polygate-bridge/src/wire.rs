//! Wire framing
//!
//! A frame is either an Arrow IPC stream (schema message followed by zero
//! or more record batches) or the three-byte sentinel `EOF`. Readers must
//! test for the sentinel before decoding.

use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{Schema, SchemaRef};
use bytes::Bytes;
use std::io::Cursor;

use crate::error::{BridgeError, Result};

/// Payload of the terminal frame
pub const EOF_SENTINEL: &[u8] = b"EOF";

/// A decoded frame
#[derive(Debug, Clone)]
pub enum Frame {
    /// End of stream
    Eof,
    /// Columnar data, possibly with no batches
    Batches {
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    },
}

impl Frame {
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    /// Rows carried by this frame
    pub fn num_rows(&self) -> usize {
        match self {
            Self::Eof => 0,
            Self::Batches { batches, .. } => batches.iter().map(|b| b.num_rows()).sum(),
        }
    }
}

/// Whether `payload` is the end-of-stream sentinel
pub fn is_eof(payload: &[u8]) -> bool {
    payload == EOF_SENTINEL
}

/// The terminal frame payload
pub fn eof_frame() -> Bytes {
    Bytes::from_static(EOF_SENTINEL)
}

/// Encode one record batch as a self-describing IPC stream
pub fn encode_batch(batch: &RecordBatch) -> Result<Bytes> {
    encode_batches(&batch.schema(), std::slice::from_ref(batch))
}

/// Encode `batches` sharing `schema` into one frame
pub fn encode_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Bytes> {
    let mut writer = StreamWriter::try_new(Vec::new(), schema)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()?;
    Ok(Bytes::from(writer.into_inner()?))
}

/// Frame carrying an empty schema and no rows
pub fn encode_empty() -> Result<Bytes> {
    encode_batches(&Schema::empty(), &[])
}

/// Decode a frame payload
pub fn decode_frame(payload: &[u8]) -> Result<Frame> {
    if is_eof(payload) {
        return Ok(Frame::Eof);
    }
    if payload.is_empty() {
        return Err(BridgeError::wire("empty frame payload"));
    }
    let reader = StreamReader::try_new(Cursor::new(payload), None)
        .map_err(|e| BridgeError::wire(format!("invalid IPC stream: {}", e)))?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Frame::Batches { schema, batches })
}
