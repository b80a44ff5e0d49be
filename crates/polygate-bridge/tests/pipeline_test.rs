//! End-to-end tests for the polygate-bridge data path, driver-free

use async_trait::async_trait;
use parking_lot::Mutex;
use polygate_bridge::prelude::*;
use polygate_rdbc::prelude::*;
use std::sync::Arc;

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<(String, usize)>>>,
}

impl Recorder {
    fn statements(&self) -> Vec<(String, usize)> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn query(&self, _sql: &str, _params: &[Value]) -> polygate_rdbc::Result<Vec<Row>> {
        Ok(vec![])
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
        Err(Error::unsupported("not needed"))
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

struct RecorderFactory(Recorder);

#[async_trait]
impl ConnectionFactory for RecorderFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> polygate_rdbc::Result<Box<dyn Connection>> {
        Ok(Box::new(self.0.clone()))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

fn cursor(n: usize) -> Box<dyn RowStream> {
    let columns = vec![
        ColumnMetadata::new("id", "BIGINT"),
        ColumnMetadata::new("name", "VARCHAR"),
        ColumnMetadata::new("amount", "DECIMAL").with_precision(10, 2),
    ];
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let rows = (0..n)
        .map(|i| {
            Row::new(
                names.clone(),
                vec![
                    Value::Int64(i as i64),
                    Value::String(format!("row-{}", i)),
                    Value::String(format!("{}.5", i)),
                ],
            )
        })
        .collect();
    Box::new(VecRowStream::new(columns, rows))
}

async fn frames_for(n: usize, requested: usize) -> Vec<bytes::Bytes> {
    let bridge = TypeBridge::new(DatabaseType::MySQL);
    let mut reader = CursorReader::new(
        cursor(n),
        &bridge,
        &BatchSizer::default(),
        requested,
        CoercionPolicy::Permissive,
    );
    let mut frames = Vec::new();
    while let Some(batch) = reader.next_batch().await.unwrap() {
        frames.push(encode_batch(&batch).unwrap());
    }
    if frames.is_empty() {
        frames.push(encode_empty().unwrap());
    }
    frames.push(eof_frame());
    frames
}

// ==================== Read Path Tests ====================

#[tokio::test]
async fn test_read_frames_sum_to_row_count() {
    let frames = frames_for(1_234, 500).await;
    let decoded: Vec<Frame> = frames.iter().map(|f| decode_frame(f).unwrap()).collect();

    assert_eq!(decoded.iter().filter(|f| f.is_eof()).count(), 1);
    assert!(decoded.last().unwrap().is_eof());
    assert_eq!(decoded.iter().map(Frame::num_rows).sum::<usize>(), 1_234);
    assert_eq!(decoded.len(), 3 + 1);
}

#[tokio::test]
async fn test_read_empty_table() {
    let frames = frames_for(0, 500).await;
    assert_eq!(frames.len(), 2);
    let first = decode_frame(&frames[0]).unwrap();
    assert!(!first.is_eof());
    assert_eq!(first.num_rows(), 0);
    assert!(is_eof(&frames[1]));
}

// ==================== Write Path Tests ====================

#[tokio::test]
async fn test_frames_written_through_batch_writer() {
    let frames = frames_for(100, 30).await;
    let mut source = RecordBatchSource::new(Vec::new());
    for frame in &frames {
        if let Frame::Batches { batches, .. } = decode_frame(frame).unwrap() {
            batches.into_iter().for_each(|b| source.push(b));
        }
    }
    assert_eq!(source.num_rows(), 100);

    let conn = Recorder::default();
    let writer = BatchWriter::new(WriterConfig::default().with_max_batch_args(90));
    let outcome = writer
        .write(&conn, &MySqlDialect, "copy", &["id", "name", "amount"], &mut source)
        .await
        .unwrap();

    assert_eq!(outcome.rows_written, 100);
    let inserts: Vec<usize> = conn
        .statements()
        .into_iter()
        .filter(|(sql, _)| sql.starts_with("INSERT"))
        .map(|(_, args)| args)
        .collect();
    assert_eq!(inserts, vec![90, 90, 90, 30]);
}

#[tokio::test]
async fn test_queue_creates_and_inserts_through_pool() {
    let recorder = Recorder::default();
    let pool = SimpleConnectionPool::new(
        PoolConfig::new("mysql://localhost/test"),
        Arc::new(RecorderFactory(recorder.clone())),
    )
    .await
    .unwrap();
    let bridge = TypeBridge::new(DatabaseType::MySQL);
    let target: Arc<dyn WriteTarget> = Arc::new(TableTarget::new(
        pool,
        bridge,
        BatchWriter::default(),
    ));

    let schema = Arc::new(bridge.schema(cursor(0).columns()));
    let rows: Vec<Vec<Value>> = (0..10)
        .map(|i| {
            vec![
                Value::Int64(i),
                Value::String("x".into()),
                Value::String("1.25".into()),
            ]
        })
        .collect();

    let queue = TableOperationQueue::default();
    queue.start();
    let op = TableOperation::new(
        "sales.orders",
        schema,
        target,
        Box::new(VecBatchSource::new(vec![rows])),
    )
    .with_create_table(true);
    let written = queue.submit(op).await.unwrap().await.unwrap().unwrap();
    queue.stop().await;

    assert_eq!(written, 10);
    let statements = recorder.statements();
    assert!(statements[0].0.starts_with("CREATE TABLE `sales`.`orders`"));
    assert!(statements[0].0.contains("DECIMAL(10,2)"));
    assert_eq!(statements[1].0, "BEGIN");
    assert_eq!(statements[2].1, 30);
    assert_eq!(statements[3].0, "COMMIT");
}
