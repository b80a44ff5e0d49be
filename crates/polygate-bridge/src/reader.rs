//! Cursor to record-batch conversion
//!
//! The canonical schema and the row budget are both fixed from the cursor's
//! column metadata before the first row is pulled.

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use tracing::debug;

use polygate_rdbc::connection::RowStream;

use crate::codec::{BatchBuilder, CoercionPolicy};
use crate::error::Result;
use crate::sizer::BatchSizer;
use crate::type_bridge::{CanonicalSchema, TypeBridge};

/// Pulls rows from a [`RowStream`] and freezes them into record batches
pub struct CursorReader {
    stream: Box<dyn RowStream>,
    schema: CanonicalSchema,
    batch_rows: usize,
    policy: CoercionPolicy,
    rows_read: u64,
    exhausted: bool,
}

impl CursorReader {
    /// Build a reader; `requested_rows` is shrunk by `sizer` to fit one frame.
    pub fn new(
        stream: Box<dyn RowStream>,
        bridge: &TypeBridge,
        sizer: &BatchSizer,
        requested_rows: usize,
        policy: CoercionPolicy,
    ) -> Self {
        let schema = bridge.schema(stream.columns());
        let batch_rows = sizer.estimate(&schema.types(), requested_rows.max(1));
        debug!(
            columns = schema.len(),
            requested_rows,
            batch_rows,
            "Estimated read batch size"
        );
        Self {
            stream,
            schema,
            batch_rows,
            policy,
            rows_read: 0,
            exhausted: false,
        }
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.schema.to_arrow()
    }

    /// Row budget per batch
    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }

    /// Rows converted so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Next non-empty batch, `None` once the cursor is drained
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        if self.exhausted {
            return Ok(None);
        }
        let mut builder = BatchBuilder::new(&self.schema, self.batch_rows, self.policy)?;
        while builder.len() < self.batch_rows {
            match self.stream.next().await? {
                Some(row) => builder.append_row(row.values())?,
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if builder.is_empty() {
            return Ok(None);
        }
        let batch = builder.finish()?;
        self.rows_read += batch.num_rows() as u64;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polygate_rdbc::connection::{DatabaseType, VecRowStream};
    use polygate_rdbc::types::{ColumnMetadata, Row, Value};

    fn cursor(n: usize) -> Box<dyn RowStream> {
        let columns = vec![
            ColumnMetadata::new("id", "INT"),
            ColumnMetadata::new("name", "VARCHAR"),
        ];
        let names = vec!["id".to_string(), "name".to_string()];
        let rows = (0..n)
            .map(|i| {
                Row::new(
                    names.clone(),
                    vec![Value::Int32(i as i32), Value::String(format!("n{}", i))],
                )
            })
            .collect();
        Box::new(VecRowStream::new(columns, rows))
    }

    #[tokio::test]
    async fn test_batches_cover_all_rows() {
        let bridge = TypeBridge::new(DatabaseType::MySQL);
        let mut reader = CursorReader::new(
            cursor(25),
            &bridge,
            &BatchSizer::default(),
            10,
            CoercionPolicy::Permissive,
        );
        let mut sizes = Vec::new();
        while let Some(batch) = reader.next_batch().await.unwrap() {
            sizes.push(batch.num_rows());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(reader.rows_read(), 25);
        assert!(reader.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_budget_shrinks_under_small_ceiling() {
        let bridge = TypeBridge::new(DatabaseType::MySQL);
        let reader = CursorReader::new(
            cursor(0),
            &bridge,
            &BatchSizer::new(1_000),
            20_000,
            CoercionPolicy::Permissive,
        );
        assert!(reader.batch_rows() < 20);
        assert_eq!(reader.schema().names(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_empty_cursor() {
        let bridge = TypeBridge::new(DatabaseType::PostgreSQL);
        let mut reader = CursorReader::new(
            cursor(0),
            &bridge,
            &BatchSizer::default(),
            100,
            CoercionPolicy::Permissive,
        );
        assert!(reader.next_batch().await.unwrap().is_none());
        assert_eq!(reader.rows_read(), 0);
    }
}
