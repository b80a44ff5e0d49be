//! MySQL wire-protocol backend for polygate-rdbc
//!
//! Serves both plain MySQL and the OLAP engine (which speaks the same
//! protocol). Streaming reads run the binary-protocol cursor on a spawned
//! task that feeds rows through a bounded channel, so a slow consumer
//! applies backpressure to the server instead of buffering the result.

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{ClientIdentity, Conn, OptsBuilder, SslOpts};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream, Transaction,
};
use crate::error::{Error, Result};
use crate::tls::{SslMode, TlsConfig};
use crate::types::{ColumnMetadata, Row, Value};

/// Rows buffered between the cursor task and the consumer
const STREAM_BUFFER: usize = 1024;

/// MySQL collation id for `binary`
const BINARY_CHARSET: u16 = 63;

type ConnSlot = Arc<Mutex<Option<Conn>>>;

fn map_mysql_error(err: mysql_async::Error, sql: Option<&str>) -> Error {
    match err {
        mysql_async::Error::Server(e) => {
            Error::from_driver(e.message, sql, Some(e.code.to_string()))
        }
        mysql_async::Error::Io(e) => Error::connection_with_source("MySQL I/O error", e),
        mysql_async::Error::Url(e) => Error::config(format!("invalid MySQL URL: {}", e)),
        other => Error::from_driver(other.to_string(), sql, None),
    }
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as My;
    match value {
        Value::Null => My::NULL,
        Value::Bool(b) => My::Int(i64::from(*b)),
        Value::Int8(n) => My::Int(i64::from(*n)),
        Value::Int16(n) => My::Int(i64::from(*n)),
        Value::Int32(n) => My::Int(i64::from(*n)),
        Value::Int64(n) => My::Int(*n),
        Value::UInt64(n) => My::UInt(*n),
        Value::Float32(n) => My::Float(*n),
        Value::Float64(n) => My::Double(*n),
        Value::Decimal(d) => My::Bytes(d.to_string().into_bytes()),
        Value::String(s) => My::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => My::Bytes(b.clone()),
        Value::Date(d) => My::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => My::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => datetime_to_mysql(dt),
        Value::DateTimeTz(dt) => datetime_to_mysql(&dt.naive_utc()),
        Value::Uuid(u) => My::Bytes(u.to_string().into_bytes()),
        Value::Json(j) => My::Bytes(j.to_string().into_bytes()),
        Value::Array(items) => My::Bytes(
            serde_json::to_string(items)
                .unwrap_or_default()
                .into_bytes(),
        ),
        Value::Interval(micros) => My::Int(*micros),
    }
}

fn datetime_to_mysql(dt: &chrono::NaiveDateTime) -> mysql_async::Value {
    mysql_async::Value::Date(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
        dt.nanosecond() / 1000,
    )
}

fn from_mysql(value: mysql_async::Value, column: &mysql_async::Column) -> Value {
    use mysql_async::Value as My;
    match value {
        My::NULL => Value::Null,
        My::Bytes(b) => {
            if column.character_set() == BINARY_CHARSET && is_binary_type(column.column_type()) {
                Value::Bytes(b)
            } else {
                match String::from_utf8(b) {
                    Ok(s) => Value::String(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                }
            }
        }
        My::Int(n) => Value::Int64(n),
        My::UInt(n) => Value::UInt64(n),
        My::Float(f) => Value::Float32(f),
        My::Double(d) => Value::Float64(d),
        My::Date(y, mo, d, h, mi, s, us) => {
            let Some(date) = chrono::NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d))
            else {
                return Value::Null;
            };
            if matches!(column.column_type(), ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE) {
                return Value::Date(date);
            }
            chrono::NaiveTime::from_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                .map(|t| Value::DateTime(date.and_time(t)))
                .unwrap_or(Value::Null)
        }
        My::Time(neg, days, h, mi, s, us) => {
            let hours = days * 24 + u32::from(h);
            if neg || hours >= 24 {
                let micros = (i64::from(hours) * 3600 + i64::from(mi) * 60 + i64::from(s))
                    * 1_000_000
                    + i64::from(us);
                Value::Interval(if neg { -micros } else { micros })
            } else {
                chrono::NaiveTime::from_hms_micro_opt(hours, u32::from(mi), u32::from(s), us)
                    .map(Value::Time)
                    .unwrap_or(Value::Null)
            }
        }
    }
}

fn is_binary_type(ty: ColumnType) -> bool {
    matches!(
        ty,
        ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_BLOB
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_GEOMETRY
            | ColumnType::MYSQL_TYPE_BIT
    )
}

/// Native type name for a result-set column, as the catalog would spell it
fn native_type_name(column: &mysql_async::Column) -> &'static str {
    let binary = column.character_set() == BINARY_CHARSET;
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING if binary => "VARBINARY",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "VARCHAR",
        ColumnType::MYSQL_TYPE_STRING if column.flags().contains(ColumnFlags::ENUM_FLAG) => "ENUM",
        ColumnType::MYSQL_TYPE_STRING if column.flags().contains(ColumnFlags::SET_FLAG) => "SET",
        ColumnType::MYSQL_TYPE_STRING if binary => "BINARY",
        ColumnType::MYSQL_TYPE_STRING => "CHAR",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
            if binary =>
        {
            "BLOB"
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB => "TEXT",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        _ => "UNKNOWN",
    }
}

fn column_metadata(columns: &[mysql_async::Column]) -> Vec<ColumnMetadata> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let flags = c.flags();
            let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
            let mut meta = ColumnMetadata::new(c.name_str().into_owned(), native_type_name(c))
                .with_unsigned(unsigned)
                .with_nullable(!flags.contains(ColumnFlags::NOT_NULL_FLAG));
            meta.ordinal = i as u32 + 1;
            meta.max_length = Some(c.column_length());
            if matches!(
                c.column_type(),
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL
            ) {
                // Display length counts the sign and the decimal point
                let scale = u32::from(c.decimals());
                let overhead = u32::from(scale > 0) + u32::from(!unsigned);
                let precision = c.column_length().saturating_sub(overhead);
                meta = meta.with_precision(precision, scale);
            }
            meta
        })
        .collect()
}

fn convert_row(row: mysql_async::Row, names: &Arc<Vec<String>>) -> Row {
    let columns = row.columns();
    let values = row
        .unwrap_raw()
        .into_iter()
        .zip(columns.iter())
        .map(|(v, c)| from_mysql(v.unwrap_or(mysql_async::Value::NULL), c))
        .collect();
    Row::new(names.as_ref().clone(), values)
}

fn ssl_opts(tls: &TlsConfig) -> Option<SslOpts> {
    if !tls.is_enabled() {
        return None;
    }
    let mut opts = SslOpts::default();
    if let Some(ca) = &tls.ca_cert_path {
        opts = opts.with_root_certs(vec![ca.clone().into()]);
    }
    if let (Some(cert), Some(key)) = (&tls.client_cert_path, &tls.client_key_path) {
        opts = opts.with_client_identity(Some(ClientIdentity::new(
            cert.clone().into(),
            key.clone().into(),
        )));
    }
    opts = match tls.mode {
        SslMode::Require => opts.with_danger_accept_invalid_certs(true),
        SslMode::VerifyCa => opts.with_danger_skip_domain_validation(true),
        SslMode::VerifyFull | SslMode::Disabled => opts,
    };
    Some(opts)
}

async fn run_query(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let params: Vec<mysql_async::Value> = params.iter().map(to_mysql).collect();
    let rows: Vec<mysql_async::Row> = conn
        .exec(sql, params)
        .await
        .map_err(|e| map_mysql_error(e, Some(sql)))?;
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let names = Arc::new(
        first
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect::<Vec<_>>(),
    );
    Ok(rows.into_iter().map(|r| convert_row(r, &names)).collect())
}

async fn run_execute(conn: &mut Conn, sql: &str, params: &[Value]) -> Result<u64> {
    let params: Vec<mysql_async::Value> = params.iter().map(to_mysql).collect();
    conn.exec_drop(sql, params)
        .await
        .map_err(|e| map_mysql_error(e, Some(sql)))?;
    Ok(conn.affected_rows())
}

/// MySQL connection
pub struct MySqlConnection {
    conn: ConnSlot,
    database: String,
}

impl MySqlConnection {
    /// Connect using `config`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = mysql_async::Opts::from_url(&config.url)
            .map_err(|e| Error::config(format!("invalid MySQL connection string: {}", e)))?;
        let database = opts.db_name().unwrap_or_default().to_string();
        let opts = OptsBuilder::from_opts(opts).ssl_opts(ssl_opts(&config.tls));

        let connect = Conn::new(opts);
        let conn = tokio::time::timeout(
            std::time::Duration::from_millis(config.connect_timeout_ms),
            connect,
        )
        .await
        .map_err(|_| Error::timeout(format!("MySQL connect exceeded {}ms", config.connect_timeout_ms)))?
        .map_err(|e| map_mysql_error(e, None))?;

        debug!(database = %database, "Opened MySQL connection");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database,
        })
    }

    /// Database this connection is bound to
    pub fn database(&self) -> &str {
        &self.database
    }

    async fn take_conn(&self) -> Result<Conn> {
        self.conn
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::resource("MySQL connection is busy in a transaction or stream"))
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::resource("MySQL connection is busy"))?;
        run_query(conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::resource("MySQL connection is busy"))?;
        run_execute(conn, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut conn = self.take_conn().await?;
        if let Err(e) = conn.query_drop("START TRANSACTION").await {
            *self.conn.lock().await = Some(conn);
            return Err(Error::transaction(format!("failed to begin transaction: {}", e)));
        }
        Ok(Box::new(MySqlTransaction {
            conn: Mutex::new(Some(conn)),
            parent: Arc::clone(&self.conn),
        }))
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let conn = self.take_conn().await?;
        let params: Vec<mysql_async::Value> = params.iter().map(to_mysql).collect();
        let (meta_tx, meta_rx) = oneshot::channel();
        let (row_tx, row_rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(drive_cursor(
            conn,
            Arc::clone(&self.conn),
            sql.to_string(),
            params,
            meta_tx,
            row_tx,
        ));

        let columns = meta_rx
            .await
            .map_err(|_| Error::resource("MySQL cursor task ended before reporting columns"))??;
        Ok(Box::new(MySqlRowStream { columns, rows: row_rx }))
    }

    async fn is_valid(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| map_mysql_error(e, None))?;
        }
        Ok(())
    }
}

type StreamItem = Result<Row>;

/// How a cursor task stopped reading rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorEnd {
    /// Server result set fully read
    Exhausted,
    /// Receiver dropped after `delivered` rows
    Abandoned { delivered: u64 },
}

impl CursorEnd {
    /// Whether the connection may go back to its owner. An abandoned cursor
    /// leaves unread rows on the wire, so the connection is closed instead.
    fn keeps_connection(self) -> bool {
        matches!(self, CursorEnd::Exhausted)
    }
}

async fn drive_cursor(
    mut conn: Conn,
    parent: ConnSlot,
    sql: String,
    params: Vec<mysql_async::Value>,
    meta_tx: oneshot::Sender<Result<Vec<ColumnMetadata>>>,
    row_tx: mpsc::Sender<StreamItem>,
) {
    let mut meta_tx = Some(meta_tx);
    let outcome: Result<CursorEnd> = async {
        let mut result = conn
            .exec_iter(sql.as_str(), params)
            .await
            .map_err(|e| map_mysql_error(e, Some(&sql)))?;

        let raw_columns = result.columns().map(|c| c.to_vec()).unwrap_or_default();
        let names = Arc::new(
            raw_columns
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect::<Vec<_>>(),
        );
        if let Some(tx) = meta_tx.take() {
            let _ = tx.send(Ok(column_metadata(&raw_columns)));
        }

        let mut delivered = 0u64;
        loop {
            match result.next().await {
                Ok(Some(row)) => {
                    if row_tx.send(Ok(convert_row(row, &names))).await.is_err() {
                        return Ok(CursorEnd::Abandoned { delivered });
                    }
                    delivered += 1;
                }
                Ok(None) => break,
                Err(e) => return Err(map_mysql_error(e, Some(&sql))),
            }
        }
        result
            .drop_result()
            .await
            .map_err(|e| map_mysql_error(e, Some(&sql)))?;
        Ok(CursorEnd::Exhausted)
    }
    .await;

    match outcome {
        Ok(end) if !end.keeps_connection() => {
            if let CursorEnd::Abandoned { delivered } = end {
                info!(
                    rows_delivered = delivered,
                    "MySQL stream consumer went away; closing connection instead of draining"
                );
            }
            // The parent slot stays empty so `is_valid` fails and the pool
            // discards this connection.
            drop(conn);
            return;
        }
        Ok(_) => {}
        Err(e) => match meta_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(e));
            }
            None => {
                let _ = row_tx.send(Err(e)).await;
            }
        },
    }
    *parent.lock().await = Some(conn);
}

/// Row stream fed by a cursor task
pub struct MySqlRowStream {
    columns: Vec<ColumnMetadata>,
    rows: mpsc::Receiver<StreamItem>,
}

impl RowStream for MySqlRowStream {
    fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move { self.rows.recv().await.transpose() })
    }
}

/// MySQL transaction
///
/// Owns the connection for its lifetime and hands it back to the parent on
/// commit or rollback. Dropped while still open, it rolls back on a
/// spawned task before returning the connection.
pub struct MySqlTransaction {
    conn: Mutex<Option<Conn>>,
    parent: ConnSlot,
}

impl MySqlTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::transaction("transaction already completed"))?;
        let outcome = conn
            .query_drop(statement)
            .await
            .map_err(|e| Error::transaction(format!("{} failed: {}", statement, e)));
        *self.parent.lock().await = Some(conn);
        outcome
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction already completed"))?;
        run_query(conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction already completed"))?;
        run_execute(conn, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        let parent = Arc::clone(&self.parent);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.query_drop("ROLLBACK").await {
                        warn!("Rollback of abandoned MySQL transaction failed: {}", e);
                        return;
                    }
                    *parent.lock().await = Some(conn);
                });
            }
            Err(_) => warn!("MySQL transaction dropped outside a runtime; connection discarded"),
        }
    }
}

/// MySQL connection factory
///
/// The same driver serves MySQL and the OLAP engine; the factory only
/// records which family it reports.
#[derive(Debug, Clone, Copy)]
pub struct MySqlConnectionFactory {
    kind: DatabaseType,
}

impl MySqlConnectionFactory {
    /// Factory reporting `kind`
    pub fn new(kind: DatabaseType) -> Self {
        Self { kind }
    }
}

impl Default for MySqlConnectionFactory {
    fn default() -> Self {
        Self::new(DatabaseType::MySQL)
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        Ok(Box::new(MySqlConnection::connect(config).await?))
    }

    fn database_type(&self) -> DatabaseType {
        self.kind
    }
}
