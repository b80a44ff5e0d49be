//! Pool-backed [`WriteTarget`]

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use polygate_rdbc::connection::Connection;
use polygate_rdbc::dialect::{dialect_for, SqlDialect};
use polygate_rdbc::pool::SimpleConnectionPool;

use crate::error::Result;
use crate::queue::WriteTarget;
use crate::type_bridge::{CanonicalSchema, TypeBridge};
use crate::writer::{BatchSource, BatchWriter};

/// Writes into one database through a connection pool.
///
/// Each operation holds one pooled connection from `begin` to
/// commit/rollback.
pub struct TableTarget {
    pool: Arc<SimpleConnectionPool>,
    dialect: Box<dyn SqlDialect>,
    bridge: TypeBridge,
    writer: BatchWriter,
}

impl TableTarget {
    pub fn new(pool: Arc<SimpleConnectionPool>, bridge: TypeBridge, writer: BatchWriter) -> Self {
        Self {
            pool,
            dialect: dialect_for(bridge.dialect()),
            bridge,
            writer,
        }
    }
}

#[async_trait]
impl WriteTarget for TableTarget {
    async fn create_table(&self, table: &str, schema: &CanonicalSchema) -> Result<()> {
        let sql = self
            .dialect
            .create_table_sql(table, &self.bridge.column_defs(schema))?;
        debug!(table, sql = %sql, "Creating table");
        let conn = self.pool.get().await?;
        conn.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn insert(
        &self,
        table: &str,
        schema: &CanonicalSchema,
        source: &mut dyn BatchSource,
    ) -> Result<u64> {
        let conn = self.pool.get().await?;
        let columns = schema.names();
        let connection: &dyn Connection = &*conn;
        let outcome = self
            .writer
            .write(connection, self.dialect.as_ref(), table, &columns, source)
            .await?;
        Ok(outcome.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_bridge::{CanonicalColumn, CanonicalType};
    use crate::writer::VecBatchSource;
    use parking_lot::Mutex;
    use polygate_rdbc::connection::{ConnectionConfig, ConnectionFactory, DatabaseType, RowStream, Transaction};
    use polygate_rdbc::pool::PoolConfig;
    use polygate_rdbc::types::Row;
    use polygate_rdbc::Value;

    #[derive(Clone, Default)]
    struct Recorder {
        statements: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Connection for Recorder {
        async fn query(&self, _sql: &str, _params: &[Value]) -> polygate_rdbc::Result<Vec<Row>> {
            Ok(vec![])
        }
        async fn execute(&self, sql: &str, _params: &[Value]) -> polygate_rdbc::Result<u64> {
            self.statements.lock().push(sql.to_string());
            Ok(0)
        }
        async fn begin(&self) -> polygate_rdbc::Result<Box<dyn Transaction>> {
            Ok(Box::new(self.clone()))
        }
        async fn query_stream(
            &self,
            _sql: &str,
            _params: &[Value],
        ) -> polygate_rdbc::Result<Box<dyn RowStream>> {
            Err(polygate_rdbc::Error::unsupported("no streams"))
        }
        async fn is_valid(&self) -> bool {
            true
        }
        async fn close(&self) -> polygate_rdbc::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Transaction for Recorder {
        async fn query(&self, _sql: &str, _params: &[Value]) -> polygate_rdbc::Result<Vec<Row>> {
            Ok(vec![])
        }
        async fn execute(&self, sql: &str, params: &[Value]) -> polygate_rdbc::Result<u64> {
            self.statements.lock().push(sql.to_string());
            Ok(params.len() as u64)
        }
        async fn commit(self: Box<Self>) -> polygate_rdbc::Result<()> {
            self.statements.lock().push("COMMIT".into());
            Ok(())
        }
        async fn rollback(self: Box<Self>) -> polygate_rdbc::Result<()> {
            self.statements.lock().push("ROLLBACK".into());
            Ok(())
        }
    }

    struct RecorderFactory(Recorder);

    #[async_trait]
    impl ConnectionFactory for RecorderFactory {
        async fn connect(&self, _config: &ConnectionConfig) -> polygate_rdbc::Result<Box<dyn Connection>> {
            Ok(Box::new(self.0.clone()))
        }
        fn database_type(&self) -> DatabaseType {
            DatabaseType::PostgreSQL
        }
    }

    #[tokio::test]
    async fn test_create_then_insert() {
        let recorder = Recorder::default();
        let pool = SimpleConnectionPool::new(
            PoolConfig::new("postgres://localhost/test"),
            Arc::new(RecorderFactory(recorder.clone())),
        )
        .await
        .unwrap();
        let target = TableTarget::new(
            pool,
            TypeBridge::new(DatabaseType::PostgreSQL),
            BatchWriter::default(),
        );
        let schema = CanonicalSchema::new(vec![
            CanonicalColumn::new("id", CanonicalType::Int64),
            CanonicalColumn::new("name", CanonicalType::Utf8),
        ]);

        target.create_table("public.people", &schema).await.unwrap();
        let mut source = VecBatchSource::new(vec![vec![
            vec![Value::Int64(1), Value::String("a".into())],
            vec![Value::Int64(2), Value::String("b".into())],
        ]]);
        let written = target.insert("public.people", &schema, &mut source).await.unwrap();

        assert_eq!(written, 2);
        let statements = recorder.statements.lock();
        assert!(statements[0].starts_with("CREATE TABLE \"public\".\"people\""));
        assert!(statements[0].contains("BIGINT"));
        assert!(statements[1].contains("($1, $2), ($3, $4)"));
        assert_eq!(statements[2], "COMMIT");
    }
}
