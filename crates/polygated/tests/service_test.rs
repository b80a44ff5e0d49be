//! Gateway service tests against an in-process mock database

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tonic::{Code, Request, Status};

use polygate_bridge::wire::{decode_frame, encode_batch, encode_empty, eof_frame, Frame};
use polygate_rdbc::prelude::*;
use polygated::config::{ConfigHandle, GatewayConfig};
use polygated::error::error_code;
use polygated::object_store::{MemoryObjectStore, ObjectStore};
use polygated::proto::{self, Gateway};
use polygated::protocol::collect_write_frames;
use polygated::service::{upload_object, GatewayService};
use polygated::GatewayDaemon;

#[derive(Clone, Default)]
struct MockDb {
    rows: usize,
    reported_count: u64,
    log: Arc<Mutex<Vec<(String, usize)>>>,
}

impl MockDb {
    fn with_rows(rows: usize) -> Self {
        Self {
            rows,
            reported_count: rows as u64,
            ..Default::default()
        }
    }

    fn statements(&self) -> Vec<String> {
        self.log.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    fn answer(&self, sql: &str) -> Vec<Row> {
        let one = |v: Value| vec![Row::new(vec!["v".into()], vec![v])];
        if sql.contains("information_schema.columns") {
            let names = vec![
                "column_name".to_string(),
                "column_type".into(),
                "nullable".into(),
                "precision".into(),
                "scale".into(),
            ];
            vec![
                Row::new(
                    names.clone(),
                    vec![
                        Value::String("id".into()),
                        Value::String("bigint".into()),
                        Value::Int64(0),
                        Value::UInt64(19),
                        Value::UInt64(0),
                    ],
                ),
                Row::new(
                    names,
                    vec![
                        Value::String("amount".into()),
                        Value::String("decimal(10,2)".into()),
                        Value::Int64(1),
                        Value::UInt64(10),
                        Value::UInt64(2),
                    ],
                ),
            ]
        } else if sql.contains("data_length") {
            one(Value::Int64(16_384))
        } else if sql.contains("GROUP BY") {
            let names = vec!["region".to_string(), "group_count".into()];
            vec![
                Row::new(names.clone(), vec![Value::String("EU".into()), Value::Int64(7)]),
                Row::new(names, vec![Value::Null, Value::Int64(2)]),
            ]
        } else if sql.starts_with("SELECT COUNT(*)") {
            one(Value::UInt64(self.reported_count))
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl Connection for MockDb {
    async fn query(&self, sql: &str, _params: &[Value]) -> polygate_rdbc::Result<Vec<Row>> {
        Ok(self.answer(sql))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> polygate_rdbc::Result<u64> {
        self.log.lock().push((sql.to_string(), params.len()));
        Ok(0)
    }

    async fn begin(&self) -> polygate_rdbc::Result<Box<dyn Transaction>> {
        self.log.lock().push(("BEGIN".into(), 0));
        Ok(Box::new(self.clone()))
    }

    async fn query_stream(
        &self,
        _sql: &str,
        _params: &[Value],
    ) -> polygate_rdbc::Result<Box<dyn RowStream>> {
        let columns = vec![
            ColumnMetadata::new("id", "BIGINT"),
            ColumnMetadata::new("name", "VARCHAR"),
        ];
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let rows = (0..self.rows)
            .map(|i| {
                Row::new(
                    names.clone(),
                    vec![Value::Int64(i as i64), Value::String(format!("n{}", i))],
                )
            })
            .collect();
        Ok(Box::new(VecRowStream::new(columns, rows)))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> polygate_rdbc::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Transaction for MockDb {
    async fn query(&self, sql: &str, _params: &[Value]) -> polygate_rdbc::Result<Vec<Row>> {
        Ok(self.answer(sql))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> polygate_rdbc::Result<u64> {
        self.log.lock().push((sql.to_string(), params.len()));
        Ok(params.len() as u64)
    }

    async fn commit(self: Box<Self>) -> polygate_rdbc::Result<()> {
        self.log.lock().push(("COMMIT".into(), 0));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> polygate_rdbc::Result<()> {
        self.log.lock().push(("ROLLBACK".into(), 0));
        Ok(())
    }
}

struct MockFactory(MockDb);

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> polygate_rdbc::Result<Box<dyn Connection>> {
        Ok(Box::new(self.0.clone()))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

fn daemon(db: &MockDb) -> GatewayDaemon {
    let config = ConfigHandle::new(GatewayConfig::default());
    let registry = PoolRegistry::new(config.snapshot().pool_config())
        .with_factory(DatabaseType::MySQL, Arc::new(MockFactory(db.clone())));
    GatewayDaemon::with_parts(config, Arc::new(registry), Arc::new(MemoryObjectStore::new()))
}

fn profile() -> proto::ConnectionProfile {
    proto::ConnectionProfile {
        dialect: "mysql".into(),
        host: "db.test".into(),
        port: 3306,
        user: "app".into(),
        secret: "secret".into(),
        database: "sales".into(),
        ..Default::default()
    }
}

fn read_request(table: &str, batch_rows: u32) -> proto::ReadRowsRequest {
    proto::ReadRowsRequest {
        connection: Some(profile()),
        table: table.into(),
        batch_rows,
        ..Default::default()
    }
}

async fn read_all(
    service: &GatewayService,
    req: proto::ReadRowsRequest,
) -> Vec<std::result::Result<proto::WireBatch, Status>> {
    let response = service.read_rows(Request::new(req)).await.unwrap();
    response.into_inner().collect().await
}

fn orders_batch(ids: &[i64]) -> RecordBatch {
    let names: Vec<String> = ids.iter().map(|i| format!("n{}", i)).collect();
    RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int64Array::from(ids.to_vec())) as ArrayRef),
        ("name", Arc::new(StringArray::from(names)) as ArrayRef),
    ])
    .unwrap()
}

fn wire(table: &str, payload: bytes::Bytes, create_table: bool) -> proto::WireBatch {
    proto::WireBatch {
        table: table.into(),
        payload,
        connection: Some(profile()),
        create_table,
    }
}

fn eof() -> proto::WireBatch {
    proto::WireBatch {
        payload: eof_frame(),
        ..Default::default()
    }
}

// ==================== Read Tests ====================

#[tokio::test]
async fn test_read_rows_frames_then_eof() {
    let db = MockDb::with_rows(25);
    let service = daemon(&db).service();

    let items = read_all(&service, read_request("orders", 10)).await;
    let frames: Vec<Frame> = items
        .iter()
        .map(|item| decode_frame(&item.as_ref().unwrap().payload).unwrap())
        .collect();

    assert_eq!(frames.len(), 4);
    assert!(frames[3].is_eof());
    assert_eq!(frames.iter().filter(|f| f.is_eof()).count(), 1);
    assert_eq!(frames.iter().map(Frame::num_rows).sum::<usize>(), 25);
}

#[tokio::test]
async fn test_read_rows_empty_table() {
    let db = MockDb::with_rows(0);
    let service = daemon(&db).service();

    let items = read_all(&service, read_request("orders", 10)).await;
    assert_eq!(items.len(), 2);
    let first = decode_frame(&items[0].as_ref().unwrap().payload).unwrap();
    assert!(!first.is_eof());
    assert_eq!(first.num_rows(), 0);
    assert!(decode_frame(&items[1].as_ref().unwrap().payload)
        .unwrap()
        .is_eof());
}

#[tokio::test]
async fn test_read_rows_count_mismatch_fails_without_eof() {
    let db = MockDb {
        reported_count: 30,
        ..MockDb::with_rows(25)
    };
    let service = daemon(&db).service();

    let items = read_all(&service, read_request("orders", 10)).await;
    let last = items.last().unwrap().as_ref().unwrap_err();
    assert_eq!(last.code(), Code::ResourceExhausted);
    assert_eq!(error_code(last), Some("RESOURCE"));
    assert!(items
        .iter()
        .filter_map(|i| i.as_ref().ok())
        .all(|w| !decode_frame(&w.payload).unwrap().is_eof()));
}

#[tokio::test]
async fn test_filtered_read_skips_count_check() {
    let db = MockDb {
        reported_count: 999,
        ..MockDb::with_rows(5)
    };
    let service = daemon(&db).service();

    let mut req = read_request("orders", 10);
    req.filter_columns = vec!["id".into()];
    req.filter_operators = vec![">=".into()];
    req.filter_values = vec!["0".into()];
    let items = read_all(&service, req).await;

    assert!(items.iter().all(std::result::Result::is_ok));
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn test_read_rows_rejects_mismatched_filters() {
    let db = MockDb::with_rows(5);
    let service = daemon(&db).service();

    let mut req = read_request("orders", 10);
    req.filter_columns = vec!["id".into(), "name".into()];
    req.filter_operators = vec!["=".into()];
    req.filter_values = vec!["1".into()];
    let status = service.read_rows(Request::new(req)).await.err().unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(error_code(&status), Some("STRUCTURAL"));
}

#[tokio::test]
async fn test_read_rows_requires_connection() {
    let db = MockDb::with_rows(5);
    let service = daemon(&db).service();

    let mut req = read_request("orders", 10);
    req.connection = None;
    let status = service.read_rows(Request::new(req)).await.err().unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
}

// ==================== Catalog Tests ====================

#[tokio::test]
async fn test_get_table_info() {
    let db = MockDb::with_rows(12);
    let service = daemon(&db).service();

    let info = service
        .get_table_info(Request::new(proto::TableInfoRequest {
            connection: Some(profile()),
            table: "orders".into(),
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(info.row_count, 12);
    assert_eq!(info.byte_size, 16_384);
    assert_eq!(info.columns.len(), 2);
    assert_eq!(info.columns[0].name, "id");
    assert!(!info.columns[0].nullable);
    assert_eq!(info.columns[1].native_type, "decimal(10,2)");
    assert!(info.columns[1].canonical_type.contains("10"));
}

#[tokio::test]
async fn test_get_group_count() {
    let db = MockDb::with_rows(9);
    let service = daemon(&db).service();

    let response = service
        .get_group_count(Request::new(proto::GroupCountRequest {
            connection: Some(profile()),
            table: "orders".into(),
            group_by: vec!["region".into()],
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.rows.len(), 2);
    assert_eq!(response.rows[0].values, vec!["EU".to_string()]);
    assert_eq!(response.rows[0].count, 7);
    assert_eq!(response.rows[1].values, vec![String::new()]);
}

#[tokio::test]
async fn test_group_count_requires_columns() {
    let db = MockDb::with_rows(9);
    let service = daemon(&db).service();

    let status = service
        .get_group_count(Request::new(proto::GroupCountRequest {
            connection: Some(profile()),
            table: "orders".into(),
            ..Default::default()
        }))
        .await
        .err()
        .unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
}

// ==================== Write Frame Tests ====================

#[tokio::test]
async fn test_collect_write_frames_merges_per_table() {
    let frames = vec![
        Ok(wire("sales.orders", encode_batch(&orders_batch(&[1, 2])).unwrap(), true)),
        Ok(proto::WireBatch {
            connection: None,
            ..wire("sales.refunds", encode_batch(&orders_batch(&[9])).unwrap(), false)
        }),
        Ok(wire("sales.orders", encode_batch(&orders_batch(&[3])).unwrap(), false)),
        Ok(wire("sales.orders", encode_empty().unwrap(), false)),
        Ok(eof()),
    ];
    let tables = collect_write_frames(futures::stream::iter(frames)).await.unwrap();

    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].table, "sales.orders");
    assert!(tables[0].create_table);
    assert_eq!(tables[0].num_rows(), 3);
    assert_eq!(tables[1].table, "sales.refunds");
    assert_eq!(tables[1].connection.host, "db.test");
    assert_eq!(tables[1].num_rows(), 1);
}

#[tokio::test]
async fn test_collect_write_frames_requires_eof() {
    let frames = vec![Ok(wire(
        "orders",
        encode_batch(&orders_batch(&[1])).unwrap(),
        false,
    ))];
    let err = collect_write_frames(futures::stream::iter(frames))
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "STRUCTURAL");
}

#[tokio::test]
async fn test_collect_write_frames_rejects_schema_change() {
    let other = RecordBatch::try_from_iter(vec![(
        "sku",
        Arc::new(StringArray::from(vec!["a"])) as ArrayRef,
    )])
    .unwrap();
    let frames = vec![
        Ok(wire("orders", encode_batch(&orders_batch(&[1])).unwrap(), false)),
        Ok(wire("orders", encode_batch(&other).unwrap(), false)),
        Ok(eof()),
    ];
    assert!(collect_write_frames(futures::stream::iter(frames))
        .await
        .is_err());
}

#[tokio::test]
async fn test_collect_write_frames_needs_connection() {
    let frames = vec![
        Ok(proto::WireBatch {
            connection: None,
            ..wire("orders", encode_batch(&orders_batch(&[1])).unwrap(), false)
        }),
        Ok(eof()),
    ];
    assert!(collect_write_frames(futures::stream::iter(frames))
        .await
        .is_err());
}

// ==================== Write Tests ====================

#[tokio::test]
async fn test_write_tables_creates_and_inserts() {
    let db = MockDb::default();
    let daemon = daemon(&db);
    let service = daemon.service();

    let frames = vec![
        Ok(wire("sales.orders", encode_batch(&orders_batch(&[1, 2, 3])).unwrap(), true)),
        Ok(eof()),
    ];
    let tables = collect_write_frames(futures::stream::iter(frames)).await.unwrap();
    let ack = service.write_tables(tables).await.unwrap();

    assert_eq!(ack.total_rows, 3);
    assert_eq!(ack.tables.len(), 1);
    assert_eq!(ack.tables[0].table, "sales.orders");

    let statements = db.statements();
    assert_eq!(statements[0], "CREATE DATABASE IF NOT EXISTS `sales`");
    assert!(statements[1].starts_with("CREATE TABLE"));
    assert!(statements[1].contains("`sales`.`orders`"));
    assert_eq!(statements[2], "BEGIN");
    assert!(statements[3].starts_with("INSERT INTO `sales`.`orders`"));
    assert_eq!(db.log.lock()[3].1, 6);
    assert_eq!(statements[4], "COMMIT");

    daemon.queue().stop().await;
}

#[tokio::test]
async fn test_write_tables_awaits_queued_tables_on_setup_failure() {
    let db = MockDb::default();
    let daemon = daemon(&db);
    let service = daemon.service();

    let unreachable = proto::ConnectionProfile {
        host: String::new(),
        ..profile()
    };
    let frames = vec![
        Ok(wire("orders", encode_batch(&orders_batch(&[1, 2])).unwrap(), false)),
        Ok(proto::WireBatch {
            connection: Some(unreachable),
            ..wire("refunds", encode_batch(&orders_batch(&[3])).unwrap(), false)
        }),
        Ok(eof()),
    ];
    let tables = collect_write_frames(futures::stream::iter(frames)).await.unwrap();
    let err = service.write_tables(tables).await.unwrap_err();

    assert_eq!(err.code().as_str(), "STRUCTURAL");
    assert!(daemon.queue().busy_tables().is_empty());
    let statements = db.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert!(statements[1].starts_with("INSERT INTO `orders`"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    assert!(statements.iter().all(|s| !s.contains("refunds")));

    daemon.queue().stop().await;
}

#[tokio::test]
async fn test_write_tables_without_rows() {
    let db = MockDb::default();
    let service = daemon(&db).service();

    let frames = vec![Ok(wire("orders", encode_empty().unwrap(), false)), Ok(eof())];
    let tables = collect_write_frames(futures::stream::iter(frames)).await.unwrap();
    let ack = service.write_tables(tables).await.unwrap();

    assert_eq!(ack.total_rows, 0);
    assert!(db.statements().is_empty());
}

// ==================== Object Upload Tests ====================

#[tokio::test]
async fn test_upload_object_concatenates_chunks() {
    let store = MemoryObjectStore::new();
    let chunks = vec![
        Ok(proto::ObjectChunk {
            bucket: "imports".into(),
            object: "orders.csv".into(),
            data: bytes::Bytes::from_static(b"id,name\n"),
        }),
        Ok(proto::ObjectChunk {
            data: bytes::Bytes::from_static(b"1,a\n"),
            ..Default::default()
        }),
    ];
    let ack = upload_object(&store, futures::stream::iter(chunks)).await.unwrap();

    assert_eq!(ack.bytes, 12);
    let stored = store.get("imports", "orders.csv").await.unwrap();
    assert_eq!(&stored[..], b"id,name\n1,a\n");
}

#[tokio::test]
async fn test_upload_object_requires_destination() {
    let store = MemoryObjectStore::new();
    let chunks = vec![Ok(proto::ObjectChunk {
        data: bytes::Bytes::from_static(b"x"),
        ..Default::default()
    })];
    assert!(upload_object(&store, futures::stream::iter(chunks)).await.is_err());
    assert!(store.is_empty());
}
