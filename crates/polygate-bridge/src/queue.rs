//! Per-table operation queue
//!
//! At most one operation per table name is in flight. The dispatcher never
//! blocks on a busy table: it re-submits that operation after a short delay
//! and moves on, so a slow table cannot stall unrelated ones.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::type_bridge::CanonicalSchema;
use crate::writer::BatchSource;

/// Destination of a table operation
#[async_trait]
pub trait WriteTarget: Send + Sync {
    /// Create `table` for `schema`
    async fn create_table(&self, table: &str, schema: &CanonicalSchema) -> Result<()>;

    /// Insert every row of `source`, returning rows written
    async fn insert(
        &self,
        table: &str,
        schema: &CanonicalSchema,
        source: &mut dyn BatchSource,
    ) -> Result<u64>;
}

/// One unit of work against one table
pub struct TableOperation {
    pub table: String,
    pub schema: Arc<CanonicalSchema>,
    pub target: Arc<dyn WriteTarget>,
    pub source: Box<dyn BatchSource>,
    /// Run create-table before inserting
    pub create_table: bool,
}

impl TableOperation {
    pub fn new(
        table: impl Into<String>,
        schema: Arc<CanonicalSchema>,
        target: Arc<dyn WriteTarget>,
        source: Box<dyn BatchSource>,
    ) -> Self {
        Self {
            table: table.into(),
            schema,
            target,
            source,
            create_table: false,
        }
    }

    pub fn with_create_table(mut self, create: bool) -> Self {
        self.create_table = create;
        self
    }

    async fn run(mut self) -> Result<u64> {
        if self.create_table {
            match self.target.create_table(&self.table, &self.schema).await {
                Ok(()) => debug!(table = %self.table, "Table created"),
                Err(e) if e.is_already_exists() => {
                    debug!(table = %self.table, "Table already exists")
                }
                Err(e) => warn!(table = %self.table, "Create table failed, inserting anyway: {}", e),
            }
        }
        self.target
            .insert(&self.table, &self.schema, self.source.as_mut())
            .await
    }
}

struct Queued {
    op: TableOperation,
    result: oneshot::Sender<Result<u64>>,
}

impl Queued {
    fn reject(self, reason: &str) {
        let _ = self.result.send(Err(BridgeError::queue(reason)));
    }
}

/// Queue settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending operations before `submit` waits
    pub capacity: usize,
    /// Delay before a busy table's operation is re-submitted
    #[serde(with = "millis")]
    pub requeue_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            requeue_delay: Duration::from_millis(50),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

struct Running {
    tx: mpsc::Sender<Queued>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

/// Removes a table from the busy set when dropped
struct BusyGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    table: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.table);
    }
}

/// Serializes mutations per table while running different tables in parallel
pub struct TableOperationQueue {
    config: QueueConfig,
    running: Mutex<Option<Running>>,
    busy: Arc<Mutex<HashSet<String>>>,
}

impl Default for TableOperationQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl TableOperationQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start the dispatcher. Calling it again while running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(self.config.capacity.max(1));
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            rx,
            tx.downgrade(),
            self.busy.clone(),
            self.config.requeue_delay,
            cancel.clone(),
        ));
        info!(capacity = self.config.capacity, "Table operation queue started");
        *running = Some(Running {
            tx,
            cancel,
            dispatcher,
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Tables with an operation in flight
    pub fn busy_tables(&self) -> Vec<String> {
        self.busy.lock().iter().cloned().collect()
    }

    /// Enqueue an operation; the receiver resolves with rows written
    pub async fn submit(&self, op: TableOperation) -> Result<oneshot::Receiver<Result<u64>>> {
        let tx = self
            .running
            .lock()
            .as_ref()
            .map(|r| r.tx.clone())
            .ok_or_else(|| BridgeError::queue("table operation queue is not running"))?;
        let (result, receiver) = oneshot::channel();
        debug!(table = %op.table, "Submitting table operation");
        tx.send(Queued { op, result })
            .await
            .map_err(|_| BridgeError::queue("table operation queue is shut down"))?;
        Ok(receiver)
    }

    /// Stop the dispatcher. Operations already handed to a worker finish;
    /// queued ones resolve with a queue error. `start` may be called again.
    pub async fn stop(&self) {
        let taken = self.running.lock().take();
        let Some(running) = taken else {
            return;
        };
        running.cancel.cancel();
        drop(running.tx);
        if let Err(e) = running.dispatcher.await {
            warn!("Queue dispatcher ended abnormally: {}", e);
        }
        info!("Table operation queue stopped");
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Queued>,
    requeue: mpsc::WeakSender<Queued>,
    busy: Arc<Mutex<HashSet<String>>>,
    requeue_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(queued) => queued,
                None => break,
            },
        };

        let claimed = busy.lock().insert(queued.op.table.clone());
        if !claimed {
            debug!(table = %queued.op.table, "Table busy, requeueing");
            let requeue = requeue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(requeue_delay).await;
                let Some(tx) = requeue.upgrade() else {
                    return queued.reject("table operation queue stopped");
                };
                if let Err(mpsc::error::SendError(queued)) = tx.send(queued).await {
                    queued.reject("table operation queue stopped");
                }
            });
            continue;
        }

        let guard = BusyGuard {
            busy: busy.clone(),
            table: queued.op.table.clone(),
        };
        tokio::spawn(async move {
            let Queued { op, result } = queued;
            let outcome = op.run().await;
            drop(guard);
            let _ = result.send(outcome);
        });
    }

    rx.close();
    while let Ok(queued) = rx.try_recv() {
        queued.reject("table operation queue stopped");
    }
}
