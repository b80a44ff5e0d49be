//! # polygate-bridge
//!
//! The data path between relational drivers and columnar frames.
//!
//! - [`type_bridge`]: native SQL types <-> canonical types <-> Arrow
//! - [`codec`]: per-value coercion into Arrow builders and back
//! - [`sizer`]: row budget that keeps one frame under the transport ceiling
//! - [`reader`]: cursor -> record batches
//! - [`writer`]: chunked inserts inside one transaction, restarted on conflicts
//! - [`queue`]: at most one in-flight mutation per table
//! - [`wire`]: Arrow IPC frames and the `EOF` sentinel
//!
//! ```rust,ignore
//! use polygate_bridge::prelude::*;
//!
//! let queue = TableOperationQueue::default();
//! queue.start();
//! let target = Arc::new(TableTarget::new(pool, TypeBridge::new(DatabaseType::MySQL), BatchWriter::default()));
//! let op = TableOperation::new("sales.orders", schema, target, Box::new(RecordBatchSource::new(batches)))
//!     .with_create_table(true);
//! let rows = queue.submit(op).await?.await??;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod queue;
pub mod reader;
pub mod retry;
pub mod sizer;
pub mod target;
pub mod type_bridge;
pub mod wire;
pub mod writer;

pub use error::{BridgeError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::codec::{batch_rows, BatchBuilder, CoercionPolicy, ColumnBuilder};
    pub use crate::error::{BridgeError, Result};
    pub use crate::queue::{QueueConfig, TableOperation, TableOperationQueue, WriteTarget};
    pub use crate::reader::CursorReader;
    pub use crate::retry::{DecorrelatedJitter, FixedBackoff};
    pub use crate::sizer::BatchSizer;
    pub use crate::target::TableTarget;
    pub use crate::type_bridge::{
        CanonicalColumn, CanonicalSchema, CanonicalType, TemporalMode, TypeBridge,
    };
    pub use crate::wire::{decode_frame, encode_batch, encode_empty, eof_frame, is_eof, Frame};
    pub use crate::writer::{
        BatchSource, BatchWriter, RecordBatchSource, VecBatchSource, WriteOutcome, WriterConfig,
    };
}
