//! Batched transactional insert
//!
//! A [`BatchWriter`] drains a [`BatchSource`] into one transaction, emitting
//! multi-row `INSERT` statements that never bind more than
//! `max_batch_args` parameters. A transient write conflict rolls the whole
//! transaction back and restarts it from a rewound source; anything else
//! rolls back and surfaces.

use arrow_array::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use polygate_rdbc::connection::{Connection, Transaction};
use polygate_rdbc::dialect::SqlDialect;
use polygate_rdbc::Value;

use crate::codec::batch_rows;
use crate::error::{BridgeError, Result};
use crate::retry::FixedBackoff;

/// Default cap on bound parameters per statement
pub const DEFAULT_MAX_BATCH_ARGS: usize = 50_000;

/// Default flush threshold in rows
pub const DEFAULT_BATCH_ROWS: usize = 20_000;

/// A pull-based, restartable source of row batches
#[async_trait]
pub trait BatchSource: Send {
    /// Restart from the first batch
    async fn rewind(&mut self) -> Result<()>;

    /// Next batch of rows, `None` once exhausted
    async fn next_rows(&mut self) -> Result<Option<Vec<Vec<Value>>>>;
}

/// Source over decoded Arrow record batches
pub struct RecordBatchSource {
    batches: Vec<RecordBatch>,
    position: usize,
}

impl RecordBatchSource {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self {
            batches,
            position: 0,
        }
    }

    pub fn push(&mut self, batch: RecordBatch) {
        self.batches.push(batch);
    }

    /// Total rows across all batches
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

#[async_trait]
impl BatchSource for RecordBatchSource {
    async fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    async fn next_rows(&mut self) -> Result<Option<Vec<Vec<Value>>>> {
        let Some(batch) = self.batches.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        batch_rows(batch).map(Some)
    }
}

/// Source over rows already in memory
#[derive(Debug, Clone, Default)]
pub struct VecBatchSource {
    batches: Vec<Vec<Vec<Value>>>,
    position: usize,
}

impl VecBatchSource {
    pub fn new(batches: Vec<Vec<Vec<Value>>>) -> Self {
        Self {
            batches,
            position: 0,
        }
    }
}

#[async_trait]
impl BatchSource for VecBatchSource {
    async fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    async fn next_rows(&mut self) -> Result<Option<Vec<Vec<Value>>>> {
        let next = self.batches.get(self.position).cloned();
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }
}

/// Writer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Hard cap on bound parameters in one statement
    pub max_batch_args: usize,
    /// Flush once this many rows are pending
    pub batch_rows: usize,
    /// Whole-transaction restart policy for write conflicts
    pub retry: FixedBackoff,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_args: DEFAULT_MAX_BATCH_ARGS,
            batch_rows: DEFAULT_BATCH_ROWS,
            retry: FixedBackoff::default(),
        }
    }
}

impl WriterConfig {
    pub fn with_max_batch_args(mut self, max: usize) -> Self {
        self.max_batch_args = max;
        self
    }

    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows;
        self
    }

    pub fn with_retry(mut self, retry: FixedBackoff) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of a completed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Rows committed
    pub rows_written: u64,
    /// INSERT statements issued by the successful attempt
    pub statements: usize,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Drives chunked inserts inside one transaction
#[derive(Debug, Clone, Default)]
pub struct BatchWriter {
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(config: WriterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Rows in one full statement for `columns` columns
    pub fn rows_per_statement(&self, columns: usize) -> usize {
        if columns == 0 {
            return 0;
        }
        self.config.max_batch_args / columns
    }

    /// Write every row of `source` into `table`.
    ///
    /// The source is rewound before each retry so a restarted transaction
    /// sees exactly the same rows.
    pub async fn write(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &str,
        columns: &[&str],
        source: &mut dyn BatchSource,
    ) -> Result<WriteOutcome> {
        if columns.is_empty() {
            return Err(polygate_rdbc::Error::schema(format!(
                "cannot insert into {} without columns",
                table
            ))
            .into());
        }
        let rows_per_statement = self.rows_per_statement(columns.len());
        if rows_per_statement == 0 {
            return Err(polygate_rdbc::Error::config(format!(
                "max_batch_args {} is smaller than the {} columns of {}",
                self.config.max_batch_args,
                columns.len(),
                table
            ))
            .into());
        }

        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            if attempt > 1 {
                source.rewind().await?;
            }
            match self
                .write_once(conn, dialect, table, columns, rows_per_statement, source)
                .await
            {
                Ok((rows_written, statements)) => {
                    info!(
                        table,
                        rows = rows_written,
                        statements,
                        attempt,
                        "Batch insert committed"
                    );
                    return Ok(WriteOutcome {
                        rows_written,
                        statements,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_write_conflict() => {
                    let Some(delay) = policy.delay_before(attempt + 1) else {
                        warn!(table, attempts = attempt, "Write conflict retries exhausted: {}", e);
                        return Err(e);
                    };
                    warn!(
                        table,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Write conflict, restarting transaction: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_once(
        &self,
        conn: &dyn Connection,
        dialect: &dyn SqlDialect,
        table: &str,
        columns: &[&str],
        rows_per_statement: usize,
        source: &mut dyn BatchSource,
    ) -> Result<(u64, usize)> {
        let tx = conn.begin().await?;
        let result = self
            .insert_all(tx.as_ref(), dialect, table, columns, rows_per_statement, source)
            .await;
        match result {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(table, "Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn insert_all(
        &self,
        tx: &dyn Transaction,
        dialect: &dyn SqlDialect,
        table: &str,
        columns: &[&str],
        rows_per_statement: usize,
        source: &mut dyn BatchSource,
    ) -> Result<(u64, usize)> {
        let width = columns.len();
        let threshold = self.config.batch_rows.clamp(1, rows_per_statement);
        let mut chunk = Chunker::new(tx, dialect, table, columns, rows_per_statement);
        let mut pending: VecDeque<Value> = VecDeque::with_capacity(threshold * width);
        let mut pending_rows = 0usize;

        while let Some(rows) = source.next_rows().await? {
            for row in rows {
                if row.len() != width {
                    return Err(polygate_rdbc::Error::schema(format!(
                        "row has {} values, {} expects {}",
                        row.len(),
                        table,
                        width
                    ))
                    .into());
                }
                pending.extend(row);
                pending_rows += 1;
                while pending_rows >= threshold {
                    let take = pending_rows.min(rows_per_statement);
                    chunk.flush(&mut pending, take).await?;
                    pending_rows -= take;
                }
            }
        }
        if pending_rows > 0 {
            chunk.flush(&mut pending, pending_rows).await?;
        }
        Ok((chunk.rows, chunk.statements))
    }
}

/// Statement emitter for one transaction
struct Chunker<'a> {
    tx: &'a dyn Transaction,
    dialect: &'a dyn SqlDialect,
    table: &'a str,
    columns: &'a [&'a str],
    full_rows: usize,
    full_sql: Option<String>,
    rows: u64,
    statements: usize,
}

impl<'a> Chunker<'a> {
    fn new(
        tx: &'a dyn Transaction,
        dialect: &'a dyn SqlDialect,
        table: &'a str,
        columns: &'a [&'a str],
        full_rows: usize,
    ) -> Self {
        Self {
            tx,
            dialect,
            table,
            columns,
            full_rows,
            full_sql: None,
            rows: 0,
            statements: 0,
        }
    }

    async fn flush(&mut self, pending: &mut VecDeque<Value>, rows: usize) -> Result<()> {
        let args: Vec<Value> = pending.drain(..rows * self.columns.len()).collect();
        let full = rows == self.full_rows;
        if full && self.full_sql.is_none() {
            self.full_sql = Some(self.dialect.insert_sql(self.table, self.columns, rows)?);
        }
        let partial;
        let sql = match &self.full_sql {
            Some(sql) if full => sql.as_str(),
            _ => {
                partial = self.dialect.insert_sql(self.table, self.columns, rows)?;
                partial.as_str()
            }
        };
        debug!(table = self.table, rows, args = args.len(), "Executing batch insert");
        self.tx
            .execute(sql, &args)
            .await
            .map_err(BridgeError::from)?;
        self.rows += rows as u64;
        self.statements += 1;
        Ok(())
    }
}
