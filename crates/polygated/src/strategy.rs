//! Per-dialect database strategy
//!
//! A [`DatabaseStrategy`] binds one connection profile to its pool, SQL
//! dialect and type bridge. Statement shapes come from the dialect; the
//! strategy only sequences them against a pooled connection.

use std::sync::Arc;
use tracing::debug;

use polygate_bridge::queue::WriteTarget;
use polygate_bridge::retry::DecorrelatedJitter;
use polygate_bridge::target::TableTarget;
use polygate_bridge::type_bridge::{CanonicalSchema, TypeBridge};
use polygate_bridge::writer::BatchWriter;
use polygate_bridge::BridgeError;
use polygate_rdbc::connection::{DatabaseType, RowStream};
use polygate_rdbc::dialect::{dialect_for, Filter, SqlDialect};
use polygate_rdbc::pool::{PooledConnection, SimpleConnectionPool};
use polygate_rdbc::registry::{ConnectionProfile, PoolRegistry};
use polygate_rdbc::types::{ColumnMetadata, Value};

use crate::error::Result;

/// Catalog facts about one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub row_count: u64,
    pub byte_size: u64,
    pub columns: Vec<ColumnMetadata>,
}

/// An open read cursor together with the connection it runs on
pub struct Cursor {
    stream: Box<dyn RowStream>,
    conn: PooledConnection,
}

impl Cursor {
    /// Split into the stream and the connection that must outlive it
    pub fn into_parts(self) -> (Box<dyn RowStream>, PooledConnection) {
        (self.stream, self.conn)
    }
}

/// Database operations for one connection profile
pub struct DatabaseStrategy {
    dialect: Box<dyn SqlDialect>,
    bridge: TypeBridge,
    pool: Arc<SimpleConnectionPool>,
    retry: DecorrelatedJitter,
}

impl DatabaseStrategy {
    /// Resolve the pool for `profile`, creating it on first use
    pub async fn connect(
        registry: &PoolRegistry,
        profile: &ConnectionProfile,
        bridge: TypeBridge,
        retry: DecorrelatedJitter,
    ) -> Result<Self> {
        let pool = retry
            .run("connect", || async {
                registry
                    .get_or_create(profile)
                    .await
                    .map_err(BridgeError::from)
            })
            .await?;
        Ok(Self::with_pool(pool, bridge, retry))
    }

    /// Strategy over an existing pool; the dialect follows `bridge`
    pub fn with_pool(
        pool: Arc<SimpleConnectionPool>,
        bridge: TypeBridge,
        retry: DecorrelatedJitter,
    ) -> Self {
        Self {
            dialect: dialect_for(bridge.dialect()),
            bridge,
            pool,
            retry,
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        self.dialect.database_type()
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn bridge(&self) -> &TypeBridge {
        &self.bridge
    }

    async fn acquire(&self) -> Result<PooledConnection> {
        let conn = self
            .retry
            .run("acquire", || async {
                self.pool.get().await.map_err(BridgeError::from)
            })
            .await?;
        Ok(conn)
    }

    /// `SELECT columns FROM table [WHERE filters]` with bound values
    pub fn build_filter_query(
        &self,
        table: &str,
        columns: &[&str],
        filters: &[Filter],
    ) -> Result<(String, Vec<Value>)> {
        let (clause, params) = self.where_parts(filters)?;
        let sql = self.dialect.select_sql(table, columns, clause.as_deref())?;
        Ok((sql, params))
    }

    /// Multi-row INSERT for `rows` rows
    pub fn build_insert(&self, table: &str, columns: &[&str], rows: usize) -> Result<String> {
        Ok(self.dialect.insert_sql(table, columns, rows)?)
    }

    pub fn create_table_sql(&self, table: &str, schema: &CanonicalSchema) -> Result<String> {
        Ok(self
            .dialect
            .create_table_sql(table, &self.bridge.column_defs(schema))?)
    }

    /// `SELECT COUNT(*)` with bound filter values
    pub fn count_sql(&self, table: &str, filters: &[Filter]) -> Result<(String, Vec<Value>)> {
        let (clause, params) = self.where_parts(filters)?;
        Ok((self.dialect.count_sql(table, clause.as_deref())?, params))
    }

    pub fn group_count_sql(
        &self,
        table: &str,
        group_by: &[&str],
        filters: &[Filter],
    ) -> Result<(String, Vec<Value>)> {
        let (clause, params) = self.where_parts(filters)?;
        Ok((
            self.dialect
                .group_count_sql(table, group_by, clause.as_deref())?,
            params,
        ))
    }

    fn where_parts(&self, filters: &[Filter]) -> Result<(Option<String>, Vec<Value>)> {
        Ok(match self.dialect.where_clause(filters, 1)? {
            Some((clause, params)) => (Some(clause), params),
            None => (None, Vec::new()),
        })
    }

    /// Open a streaming cursor
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        let conn = self.acquire().await?;
        debug!(sql, params = params.len(), "Opening cursor");
        let stream = conn.query_stream(sql, params).await?;
        Ok(Cursor { stream, conn })
    }

    /// Rows matching `filters`
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let (sql, params) = self.count_sql(table, filters)?;
        let conn = self.acquire().await?;
        let row = conn.query_one(&sql, &params).await?;
        Ok(row.and_then(|r| r.get(0).and_then(as_count)).unwrap_or(0))
    }

    /// `(group key values, count)` per group
    pub async fn group_count(
        &self,
        table: &str,
        group_by: &[&str],
        filters: &[Filter],
    ) -> Result<Vec<(Vec<Value>, u64)>> {
        let (sql, params) = self.group_count_sql(table, group_by, filters)?;
        let conn = self.acquire().await?;
        let rows = conn.query(&sql, &params).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut values = row.into_values();
                let count = values.pop().as_ref().and_then(as_count).unwrap_or(0);
                (values, count)
            })
            .collect())
    }

    /// Columns, row count and on-disk size of `table`
    pub async fn table_info(&self, table: &str) -> Result<TableDescription> {
        let conn = self.acquire().await?;
        let rows = conn
            .query(&self.dialect.list_columns_sql(table)?, &[])
            .await?;
        if rows.is_empty() {
            return Err(polygate_rdbc::Error::schema(format!(
                "table {} has no columns or does not exist",
                table
            ))
            .into());
        }
        let columns = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let text = |idx| row.get(idx).and_then(Value::as_string).unwrap_or_default();
                let mut meta = ColumnMetadata::new(text(0), text(1));
                meta.ordinal = i as u32 + 1;
                meta.nullable = row.get(2).and_then(Value::as_bool).unwrap_or(true);
                meta.precision = row.get(3).and_then(as_u32);
                meta.scale = row.get(4).and_then(as_u32);
                meta.unsigned = meta.type_name.to_lowercase().contains("unsigned");
                meta
            })
            .collect();

        let count_sql = self.dialect.count_sql(table, None)?;
        let row_count = conn
            .query_one(&count_sql, &[])
            .await?
            .and_then(|r| r.get(0).and_then(as_count))
            .unwrap_or(0);
        let byte_size = conn
            .query_one(&self.dialect.table_size_sql(table)?, &[])
            .await?
            .and_then(|r| r.get(0).and_then(as_count))
            .unwrap_or(0);

        Ok(TableDescription {
            row_count,
            byte_size,
            columns,
        })
    }

    /// Create the database (schema) if it does not exist
    pub async fn ensure_database(&self, database: &str) -> Result<()> {
        let sql = self.dialect.create_database_sql(database)?;
        let conn = self.acquire().await?;
        match conn.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write target sharing this strategy's pool
    pub fn write_target(&self, writer: BatchWriter) -> Arc<dyn WriteTarget> {
        Arc::new(TableTarget::new(self.pool.clone(), self.bridge, writer))
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_string().and_then(|s| s.trim().parse().ok()))
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_helpers() {
        assert_eq!(as_count(&Value::Int64(7)), Some(7));
        assert_eq!(as_count(&Value::String("42".into())), Some(42));
        assert_eq!(as_count(&Value::Null), None);
        assert_eq!(as_u32(&Value::UInt64(10)), Some(10));
        assert_eq!(as_u32(&Value::Int64(-1)), None);
    }
}
