//! PostgreSQL backend for polygate-rdbc
//!
//! Every statement is prepared first so parameters can be bound to the
//! types the server inferred. Callers pass loosely typed values (strings
//! from request filters, wide integers from decoded batches) and this layer
//! converts them per placeholder. Streaming reads use `query_raw`, which
//! yields rows as they arrive.

use async_trait::async_trait;
use futures::StreamExt;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream, Transaction,
};
use crate::error::{Error, Result};
use crate::tls::build_rustls_config;
use crate::types::{ColumnMetadata, Row, Value};

type Param = Box<dyn ToSql + Sync + Send>;

fn map_pg_error(err: tokio_postgres::Error, sql: Option<&str>) -> Error {
    if err.is_closed() {
        return Error::connection_with_source("PostgreSQL connection closed", err);
    }
    let code = err.code().map(|c| c.code().to_string());
    let message = match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    };
    Error::from_driver(message, sql, code)
}

fn bind_error(value: &Value, ty: &Type) -> Error {
    Error::type_conversion(format!("cannot bind {} value as {}", value.kind(), ty.name()))
}

fn parse_trimmed<T: FromStr>(value: &Value) -> Option<T> {
    value.as_str().and_then(|s| s.trim().parse().ok())
}

fn text_of(value: &Value) -> Option<String> {
    value.as_string().or_else(|| match value {
        Value::Date(d) => Some(d.to_string()),
        Value::Time(t) => Some(t.to_string()),
        Value::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::DateTimeTz(dt) => Some(dt.to_rfc3339()),
        Value::Json(j) => Some(j.to_string()),
        Value::Interval(us) => Some(us.to_string()),
        _ => None,
    })
}

fn parse_naive_datetime(s: &str) -> Option<chrono::NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn null_of(ty: &Type) -> Param {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::NUMERIC => Box::new(None::<Decimal>),
        Type::BYTEA => Box::new(None::<Vec<u8>>),
        Type::DATE => Box::new(None::<chrono::NaiveDate>),
        Type::TIME => Box::new(None::<chrono::NaiveTime>),
        Type::TIMESTAMP => Box::new(None::<chrono::NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<chrono::DateTime<chrono::Utc>>),
        Type::UUID => Box::new(None::<uuid::Uuid>),
        Type::JSON | Type::JSONB => Box::new(None::<serde_json::Value>),
        _ => Box::new(None::<String>),
    }
}

/// Convert `value` into a parameter accepted by a placeholder of type `ty`
fn bind(value: &Value, ty: &Type) -> Result<Param> {
    if value.is_null() {
        return Ok(null_of(ty));
    }
    let err = || bind_error(value, ty);
    let int = || value.as_i64().or_else(|| parse_trimmed::<i64>(value));

    let param: Param = match *ty {
        Type::BOOL => Box::new(value.as_bool().ok_or_else(err)?),
        Type::INT2 => Box::new(int().and_then(|n| i16::try_from(n).ok()).ok_or_else(err)?),
        Type::INT4 => Box::new(int().and_then(|n| i32::try_from(n).ok()).ok_or_else(err)?),
        Type::INT8 => Box::new(int().ok_or_else(err)?),
        Type::FLOAT4 => Box::new(
            value
                .as_f64()
                .or_else(|| parse_trimmed::<f64>(value))
                .ok_or_else(err)? as f32,
        ),
        Type::FLOAT8 => Box::new(
            value
                .as_f64()
                .or_else(|| parse_trimmed::<f64>(value))
                .ok_or_else(err)?,
        ),
        Type::NUMERIC => {
            let decimal = match value {
                Value::Decimal(d) => Some(*d),
                Value::Float32(f) => Decimal::try_from(*f).ok(),
                Value::Float64(f) => Decimal::try_from(*f).ok(),
                Value::UInt64(n) => Some(Decimal::from(*n)),
                other => other
                    .as_i64()
                    .map(Decimal::from)
                    .or_else(|| other.as_str().and_then(|s| Decimal::from_str(s.trim()).ok())),
            };
            Box::new(decimal.ok_or_else(err)?)
        }
        Type::BYTEA => Box::new(
            value
                .as_bytes()
                .map(<[u8]>::to_vec)
                .or_else(|| text_of(value).map(String::into_bytes))
                .ok_or_else(err)?,
        ),
        Type::DATE => {
            let date = match value {
                Value::Date(d) => Some(*d),
                Value::DateTime(dt) => Some(dt.date()),
                Value::DateTimeTz(dt) => Some(dt.date_naive()),
                other => other.as_str().and_then(|s| parse_naive_datetime(s).map(|dt| dt.date())),
            };
            Box::new(date.ok_or_else(err)?)
        }
        Type::TIME => {
            let time = match value {
                Value::Time(t) => Some(*t),
                other => other
                    .as_str()
                    .and_then(|s| chrono::NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f").ok()),
            };
            Box::new(time.ok_or_else(err)?)
        }
        Type::TIMESTAMP => {
            let ts = match value {
                Value::DateTime(dt) => Some(*dt),
                Value::DateTimeTz(dt) => Some(dt.naive_utc()),
                Value::Date(d) => d.and_hms_opt(0, 0, 0),
                other => other.as_str().and_then(parse_naive_datetime),
            };
            Box::new(ts.ok_or_else(err)?)
        }
        Type::TIMESTAMPTZ => {
            let ts = match value {
                Value::DateTimeTz(dt) => Some(*dt),
                Value::DateTime(dt) => Some(dt.and_utc()),
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
                other => other.as_str().and_then(|s| {
                    chrono::DateTime::parse_from_rfc3339(s.trim())
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .ok()
                        .or_else(|| parse_naive_datetime(s).map(|dt| dt.and_utc()))
                }),
            };
            Box::new(ts.ok_or_else(err)?)
        }
        Type::UUID => {
            let id = match value {
                Value::Uuid(u) => Some(*u),
                other => other.as_str().and_then(|s| uuid::Uuid::parse_str(s.trim()).ok()),
            };
            Box::new(id.ok_or_else(err)?)
        }
        Type::JSON | Type::JSONB => {
            let json = match value {
                Value::Json(j) => j.clone(),
                other => {
                    let text = text_of(other).ok_or_else(err)?;
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
                }
            };
            Box::new(json)
        }
        _ => Box::new(text_of(value).ok_or_else(err)?),
    };
    Ok(param)
}

fn bind_all(values: &[Value], types: &[Type], sql: &str) -> Result<Vec<Param>> {
    if values.len() != types.len() {
        return Err(Error::invalid_request(format!(
            "statement expects {} parameters, got {}: {}",
            types.len(),
            values.len(),
            sql
        )));
    }
    values.iter().zip(types).map(|(v, t)| bind(v, t)).collect()
}

fn param_refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Whether an otherwise unmapped type can be read as text
fn text_decodable(ty: &Type) -> bool {
    <String as tokio_postgres::types::FromSql>::accepts(ty)
}

fn decode(row: &tokio_postgres::Row, idx: usize, column: &tokio_postgres::Column) -> Value {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
        column: &tokio_postgres::Column,
        wrap: impl FnOnce(T) -> Value,
    ) -> Value {
        match row.try_get::<_, Option<T>>(idx) {
            Ok(Some(v)) => wrap(v),
            Ok(None) => Value::Null,
            Err(e) => {
                warn!(
                    column = column.name(),
                    pg_type = %column.type_(),
                    "PostgreSQL value not decodable, returning null: {}",
                    e
                );
                Value::Null
            }
        }
    }

    let c = column;
    match *c.type_() {
        Type::BOOL => get(row, idx, c, Value::Bool),
        Type::CHAR => get(row, idx, c, Value::Int8),
        Type::INT2 => get(row, idx, c, Value::Int16),
        Type::INT4 => get(row, idx, c, Value::Int32),
        Type::INT8 => get(row, idx, c, Value::Int64),
        Type::OID => get(row, idx, c, |n: u32| Value::UInt64(u64::from(n))),
        Type::FLOAT4 => get(row, idx, c, Value::Float32),
        Type::FLOAT8 => get(row, idx, c, Value::Float64),
        Type::NUMERIC => get(row, idx, c, Value::Decimal),
        Type::BYTEA => get(row, idx, c, Value::Bytes),
        Type::DATE => get(row, idx, c, Value::Date),
        Type::TIME => get(row, idx, c, Value::Time),
        Type::TIMESTAMP => get(row, idx, c, Value::DateTime),
        Type::TIMESTAMPTZ => get(row, idx, c, Value::DateTimeTz),
        Type::UUID => get(row, idx, c, Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx, c, Value::Json),
        ref other if text_decodable(other) => get(row, idx, c, Value::String),
        ref other => {
            warn!(
                column = c.name(),
                pg_type = %other,
                "No decoder for PostgreSQL type, returning null"
            );
            Value::Null
        }
    }
}

fn convert_row(row: &tokio_postgres::Row, names: &Arc<Vec<String>>) -> Row {
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, c)| decode(row, i, c))
        .collect();
    Row::new(names.as_ref().clone(), values)
}

fn column_names(columns: &[tokio_postgres::Column]) -> Arc<Vec<String>> {
    Arc::new(columns.iter().map(|c| c.name().to_string()).collect())
}

fn column_metadata(columns: &[tokio_postgres::Column]) -> Vec<ColumnMetadata> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut meta = ColumnMetadata::new(c.name(), c.type_().name());
            meta.ordinal = i as u32 + 1;
            meta
        })
        .collect()
}

async fn pg_query(client: &Client, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let stmt = client
        .prepare(sql)
        .await
        .map_err(|e| map_pg_error(e, Some(sql)))?;
    let bound = bind_all(params, stmt.params(), sql)?;
    let rows = client
        .query(&stmt, &param_refs(&bound))
        .await
        .map_err(|e| map_pg_error(e, Some(sql)))?;
    let names = column_names(stmt.columns());
    Ok(rows.iter().map(|r| convert_row(r, &names)).collect())
}

async fn pg_execute(client: &Client, sql: &str, params: &[Value]) -> Result<u64> {
    if params.is_empty() {
        // Utility statements (DDL, transaction control) skip the prepare round trip
        client
            .batch_execute(sql)
            .await
            .map_err(|e| map_pg_error(e, Some(sql)))?;
        return Ok(0);
    }
    let stmt = client
        .prepare(sql)
        .await
        .map_err(|e| map_pg_error(e, Some(sql)))?;
    let bound = bind_all(params, stmt.params(), sql)?;
    client
        .execute(&stmt, &param_refs(&bound))
        .await
        .map_err(|e| map_pg_error(e, Some(sql)))
}

/// PostgreSQL connection
pub struct PgConnection {
    client: Arc<Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Wrap a connected client
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    fn client(&self) -> Result<&Client> {
        if self.closed.load(Ordering::Acquire) || self.client.is_closed() {
            return Err(Error::connection("PostgreSQL connection is closed"));
        }
        Ok(&self.client)
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        pg_query(self.client()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        pg_execute(self.client()?, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.client()?
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::Transaction {
                message: format!("failed to begin transaction: {}", e),
                source: Some(Box::new(e)),
            })?;
        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> Result<Box<dyn RowStream>> {
        let client = self.client()?;
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| map_pg_error(e, Some(sql)))?;
        let bound = bind_all(params, stmt.params(), sql)?;
        let rows = client
            .query_raw(&stmt, param_refs(&bound))
            .await
            .map_err(|e| map_pg_error(e, Some(sql)))?;

        Ok(Box::new(PgRowStream {
            columns: column_metadata(stmt.columns()),
            names: column_names(stmt.columns()),
            rows: Box::pin(rows),
        }))
    }

    async fn is_valid(&self) -> bool {
        match self.client() {
            Ok(client) => client.simple_query("SELECT 1").await.is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Row stream over a `query_raw` portal
pub struct PgRowStream {
    columns: Vec<ColumnMetadata>,
    names: Arc<Vec<String>>,
    rows: Pin<Box<tokio_postgres::RowStream>>,
}

impl RowStream for PgRowStream {
    fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    fn next(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Row>>> + Send + '_>> {
        Box::pin(async move {
            match self.rows.next().await {
                Some(Ok(row)) => Ok(Some(convert_row(&row, &self.names))),
                Some(Err(e)) => Err(map_pg_error(e, None)),
                None => Ok(None),
            }
        })
    }
}

/// PostgreSQL transaction
///
/// Dropped without commit or rollback, it issues `ROLLBACK` on a spawned
/// task.
pub struct PgTransaction {
    client: Arc<Client>,
    finished: AtomicBool,
}

impl PgTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| Error::Transaction {
                message: format!("{} failed: {}", statement, e),
                source: Some(Box::new(e)),
            })
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        pg_query(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        pg_execute(&self.client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let client = Arc::clone(&self.client);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        warn!("Rollback of abandoned PostgreSQL transaction failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("PostgreSQL transaction dropped outside a runtime"),
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config = tokio_postgres::Config::from_str(&config.url)
            .map_err(|e| Error::config(format!("invalid PostgreSQL URL: {}", e)))?;
        pg_config.connect_timeout(std::time::Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let client = if config.tls.is_enabled() {
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(build_rustls_config(&config.tls)?);
            let (client, connection) = pg_config
                .connect(tls)
                .await
                .map_err(|e| map_pg_error(e, None))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("PostgreSQL connection task ended: {}", e);
                }
            });
            client
        } else {
            let (client, connection) = pg_config
                .connect(tokio_postgres::NoTls)
                .await
                .map_err(|e| map_pg_error(e, None))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("PostgreSQL connection task ended: {}", e);
                }
            });
            client
        };

        debug!(tls = %config.tls.mode, "Opened PostgreSQL connection");
        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
