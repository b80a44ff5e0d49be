//! `polygate.v1.Gateway` handlers

use arrow_schema::SchemaRef;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};

use polygate_bridge::queue::{TableOperation, TableOperationQueue};
use polygate_bridge::type_bridge::{CanonicalSchema, TypeBridge};
use polygate_bridge::writer::{BatchWriter, RecordBatchSource};
use polygate_bridge::BridgeError;
use polygate_rdbc::connection::DatabaseType;
use polygate_rdbc::dialect::{split_table_name, Filter};
use polygate_rdbc::registry::{ConnectionProfile, PoolRegistry};
use polygate_rdbc::tls::{SslMode, TlsConfig};
use polygate_rdbc::types::Value;

use crate::config::{ConfigHandle, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::object_store::ObjectStore;
use crate::proto::{self, Gateway};
use crate::protocol::{collect_write_frames, send_frames, ReadOptions, ReadOutcome, TableBatches};
use crate::strategy::DatabaseStrategy;

/// Per-table state while a write call is in flight
enum Pending {
    Queued(oneshot::Receiver<polygate_bridge::Result<u64>>),
    Done(Result<u64>),
}

type FrameStream = Pin<Box<dyn Stream<Item = std::result::Result<proto::WireBatch, Status>> + Send>>;

/// Frames buffered between the cursor task and the transport
const READ_CHANNEL_DEPTH: usize = 4;

/// Convert a request profile into a driver profile
pub fn connection_profile(profile: Option<&proto::ConnectionProfile>) -> Result<ConnectionProfile> {
    let p = profile.ok_or_else(|| GatewayError::invalid_request("connection is required"))?;
    let dialect: DatabaseType = p.dialect.parse()?;
    let port = u16::try_from(p.port)
        .map_err(|_| GatewayError::invalid_request(format!("invalid port {}", p.port)))?;
    let mode: SslMode = p
        .tls_mode
        .parse()
        .map_err(|e: polygate_rdbc::Error| GatewayError::invalid_request(e.to_string()))?;

    let mut tls = TlsConfig::new(mode);
    if !p.ca_cert_path.is_empty() {
        tls = tls.with_ca_cert(&p.ca_cert_path);
    }
    if !p.client_cert_path.is_empty() || !p.client_key_path.is_empty() {
        tls = tls.with_client_cert(&p.client_cert_path, &p.client_key_path);
    }

    Ok(ConnectionProfile::new(dialect, &p.host, port, &p.user, &p.secret, &p.database).with_tls(tls))
}

/// The gateway service
pub struct GatewayService {
    config: ConfigHandle,
    registry: Arc<PoolRegistry>,
    queue: Arc<TableOperationQueue>,
    objects: Arc<dyn ObjectStore>,
}

impl GatewayService {
    pub fn new(
        config: ConfigHandle,
        registry: Arc<PoolRegistry>,
        queue: Arc<TableOperationQueue>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            registry,
            queue,
            objects,
        }
    }

    async fn strategy(
        &self,
        profile: Option<&proto::ConnectionProfile>,
        config: &GatewayConfig,
    ) -> Result<DatabaseStrategy> {
        let profile = connection_profile(profile)?;
        let bridge = TypeBridge::new(profile.dialect).with_temporal_mode(config.read.temporal_mode);
        DatabaseStrategy::connect(&self.registry, &profile, bridge, config.network_retry).await
    }

    async fn start_read(&self, req: proto::ReadRowsRequest) -> Result<FrameStream> {
        let config = self.config.snapshot();
        let strategy = self.strategy(req.connection.as_ref(), &config).await?;

        let filters = Filter::from_parallel(&req.filter_columns, &req.filter_operators, &req.filter_values)?;
        let (sql, params, verify) = if !req.sql.trim().is_empty() {
            if !filters.is_empty() || !req.columns.is_empty() {
                return Err(GatewayError::invalid_request(
                    "sql cannot be combined with columns or filters",
                ));
            }
            (req.sql.clone(), Vec::new(), false)
        } else {
            if req.table.is_empty() {
                return Err(GatewayError::invalid_request("table or sql is required"));
            }
            let columns: Vec<&str> = req.columns.iter().map(String::as_str).collect();
            let (sql, params) = strategy.build_filter_query(&req.table, &columns, &filters)?;
            (sql, params, filters.is_empty() && config.read.verify_row_count)
        };

        let expected = if verify {
            Some(strategy.count(&req.table, &[]).await?)
        } else {
            None
        };
        let cursor = strategy.query(&sql, &params).await?;
        let options = ReadOptions {
            bridge: *strategy.bridge(),
            sizer: config.sizer(),
            batch_rows: match req.batch_rows {
                0 => config.read.batch_rows,
                n => n as usize,
            },
            policy: config.coercion_policy(),
        };

        let label = if req.table.is_empty() { "<sql>".to_string() } else { req.table.clone() };
        let (tx, rx) = mpsc::channel(READ_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let (stream, _conn) = cursor.into_parts();
            match send_frames(stream, &label, options, expected, &tx).await {
                Ok(ReadOutcome::Complete { .. }) => {}
                Ok(ReadOutcome::Cancelled { rows }) => {
                    info!(table = %label, rows, "Read stream cancelled by client")
                }
                Err(e) => {
                    error!(table = %label, "Read stream failed: {}", e);
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Queue one operation per table and wait for all of them.
    ///
    /// A table that fails before reaching the queue does not stop the
    /// others; every queued operation is awaited before the first failure
    /// is returned.
    pub async fn write_tables(&self, tables: Vec<TableBatches>) -> Result<proto::WriteAck> {
        let config = self.config.snapshot();
        let mut pending = Vec::with_capacity(tables.len());

        for table in tables {
            let Some(schema) = table.schema.clone() else {
                if table.create_table {
                    warn!(table = %table.table, "No schema received, skipping create");
                }
                pending.push((table.table, Pending::Done(Ok(0))));
                continue;
            };
            let name = table.table.clone();
            let state = match self.submit_table(table, schema, &config).await {
                Ok(rx) => Pending::Queued(rx),
                Err(e) => Pending::Done(Err(e)),
            };
            pending.push((name, state));
        }

        let mut ack = proto::WriteAck::default();
        let mut first_error = None;
        for (table, state) in pending {
            let result = match state {
                Pending::Done(result) => result,
                Pending::Queued(rx) => match rx.await {
                    Ok(result) => result.map_err(GatewayError::from),
                    Err(_) => Err(BridgeError::queue("operation dropped before completion").into()),
                },
            };
            match result {
                Ok(rows) => {
                    ack.total_rows += rows;
                    ack.tables.push(proto::TableWriteResult {
                        table,
                        rows_written: rows,
                    });
                }
                Err(e) => {
                    error!(table = %table, "Write failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(ack),
        }
    }

    async fn submit_table(
        &self,
        table: TableBatches,
        schema: SchemaRef,
        config: &GatewayConfig,
    ) -> Result<oneshot::Receiver<polygate_bridge::Result<u64>>> {
        let strategy = self.strategy(Some(&table.connection), config).await?;
        if table.create_table {
            if let (Some(database), _) = split_table_name(&table.table)? {
                strategy.ensure_database(database).await?;
            }
        }
        let op = TableOperation::new(
            table.table,
            Arc::new(CanonicalSchema::from_arrow(&schema)),
            strategy.write_target(BatchWriter::new(config.writer.clone())),
            Box::new(RecordBatchSource::new(table.batches)),
        )
        .with_create_table(table.create_table);
        Ok(self.queue.submit(op).await?)
    }

    async fn table_info(&self, req: proto::TableInfoRequest) -> Result<proto::TableInfo> {
        if req.table.is_empty() {
            return Err(GatewayError::invalid_request("table is required"));
        }
        let config = self.config.snapshot();
        let strategy = self.strategy(req.connection.as_ref(), &config).await?;
        let info = strategy.table_info(&req.table).await?;
        let columns = info
            .columns
            .iter()
            .map(|meta| {
                let canonical = strategy.bridge().column(meta);
                proto::ColumnInfo {
                    name: meta.name.clone(),
                    native_type: meta.type_name.clone(),
                    canonical_type: canonical.data_type.to_string(),
                    nullable: meta.nullable,
                }
            })
            .collect();
        Ok(proto::TableInfo {
            row_count: info.row_count,
            byte_size: info.byte_size,
            columns,
        })
    }

    async fn group_count(&self, req: proto::GroupCountRequest) -> Result<proto::GroupCountResponse> {
        if req.table.is_empty() || req.group_by.is_empty() {
            return Err(GatewayError::invalid_request("table and group_by are required"));
        }
        let filters = Filter::from_parallel(&req.filter_columns, &req.filter_operators, &req.filter_values)?;
        let config = self.config.snapshot();
        let strategy = self.strategy(req.connection.as_ref(), &config).await?;
        let group_by: Vec<&str> = req.group_by.iter().map(String::as_str).collect();
        let groups = strategy.group_count(&req.table, &group_by, &filters).await?;
        Ok(proto::GroupCountResponse {
            rows: groups
                .into_iter()
                .map(|(values, count)| proto::GroupCountRow {
                    values: values.iter().map(render).collect(),
                    count,
                })
                .collect(),
        })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Date(d) => d.to_string(),
        Value::DateTime(dt) => dt.to_string(),
        Value::DateTimeTz(dt) => dt.to_rfc3339(),
        other => other.as_string().unwrap_or_else(|| format!("{:?}", other)),
    }
}

/// Accumulate an object upload; the first chunk names the destination
pub async fn upload_object<S>(store: &dyn ObjectStore, mut chunks: S) -> Result<proto::ObjectAck>
where
    S: Stream<Item = std::result::Result<proto::ObjectChunk, Status>> + Unpin,
{
    let first = match chunks.next().await {
        Some(chunk) => chunk.map_err(|s| GatewayError::invalid_request(s.message().to_string()))?,
        None => return Err(GatewayError::invalid_request("upload stream is empty")),
    };
    if first.bucket.is_empty() || first.object.is_empty() {
        return Err(GatewayError::invalid_request(
            "first chunk must carry bucket and object",
        ));
    }
    let mut data = BytesMut::from(&first.data[..]);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|s| GatewayError::invalid_request(s.message().to_string()))?;
        data.extend_from_slice(&chunk.data);
    }
    let bytes = data.len() as u64;
    store.put(&first.bucket, &first.object, data.freeze()).await?;
    info!(bucket = %first.bucket, object = %first.object, bytes, "Object uploaded");
    Ok(proto::ObjectAck {
        bucket: first.bucket,
        object: first.object,
        bytes,
    })
}

#[tonic::async_trait]
impl Gateway for GatewayService {
    type ReadRowsStream = FrameStream;

    async fn read_rows(
        &self,
        request: Request<proto::ReadRowsRequest>,
    ) -> std::result::Result<Response<Self::ReadRowsStream>, Status> {
        Ok(Response::new(self.start_read(request.into_inner()).await?))
    }

    async fn write_rows(
        &self,
        request: Request<Streaming<proto::WireBatch>>,
    ) -> std::result::Result<Response<proto::WriteAck>, Status> {
        let tables = collect_write_frames(request.into_inner()).await?;
        Ok(Response::new(self.write_tables(tables).await?))
    }

    async fn get_table_info(
        &self,
        request: Request<proto::TableInfoRequest>,
    ) -> std::result::Result<Response<proto::TableInfo>, Status> {
        Ok(Response::new(self.table_info(request.into_inner()).await?))
    }

    async fn get_group_count(
        &self,
        request: Request<proto::GroupCountRequest>,
    ) -> std::result::Result<Response<proto::GroupCountResponse>, Status> {
        Ok(Response::new(self.group_count(request.into_inner()).await?))
    }

    async fn upload_object(
        &self,
        request: Request<Streaming<proto::ObjectChunk>>,
    ) -> std::result::Result<Response<proto::ObjectAck>, Status> {
        Ok(Response::new(
            upload_object(self.objects.as_ref(), request.into_inner()).await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> proto::ConnectionProfile {
        proto::ConnectionProfile {
            dialect: "mysql".into(),
            host: "db.internal".into(),
            port: 0,
            user: "app".into(),
            secret: "s3cret".into(),
            database: "sales".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_connection_profile() {
        let p = connection_profile(Some(&profile())).unwrap();
        assert_eq!(p.dialect, DatabaseType::MySQL);
        assert_eq!(p.port(), 3306);
        assert_eq!(p.tls.mode, SslMode::Disabled);

        let mut tls = profile();
        tls.tls_mode = "verify-full".into();
        tls.ca_cert_path = "/etc/ca.pem".into();
        let p = connection_profile(Some(&tls)).unwrap();
        assert_eq!(p.tls.mode, SslMode::VerifyFull);
        assert!(p.tls.ca_cert_path.is_some());
    }

    #[test]
    fn test_connection_profile_rejects_bad_input() {
        assert!(connection_profile(None).is_err());

        let mut bad = profile();
        bad.dialect = "oracle".into();
        let err = connection_profile(Some(&bad)).unwrap_err();
        assert_eq!(err.code().as_str(), "STRUCTURAL");

        let mut bad = profile();
        bad.port = 70_000;
        assert!(connection_profile(Some(&bad)).is_err());

        let mut bad = profile();
        bad.tls_mode = "sometimes".into();
        assert_eq!(
            connection_profile(Some(&bad)).unwrap_err().code().as_str(),
            "STRUCTURAL"
        );
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&Value::Null), "");
        assert_eq!(render(&Value::Int64(3)), "3");
        assert_eq!(render(&Value::String("EU".into())), "EU");
    }
}
