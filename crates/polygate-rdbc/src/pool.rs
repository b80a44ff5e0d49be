//! Connection pooling for polygate-rdbc
//!
//! A semaphore bounds the number of open connections; idle connections sit
//! in a LIFO stack behind a short-lived lock. Callers that find the pool at
//! capacity wait for a permit. An acquire timeout is optional and off by
//! default.
//!
//! ```rust,ignore
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("mysql://app:secret@db:3306/sales").with_max_size(16),
//!     Arc::new(MySqlConnectionFactory),
//! )
//! .await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! // returned to the pool on drop
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Connections opened eagerly at construction
    pub min_idle: usize,
    /// Maximum open connections
    pub max_size: usize,
    /// How long `get` may wait for a permit; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,
    /// Run `is_valid` before handing out an idle connection
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_idle: 0,
            max_size: 10,
            acquire_timeout: None,
            max_lifetime: Duration::from_secs(1800),
            idle_timeout: Duration::from_secs(600),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Use an existing connection config
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Set connections opened at construction
    pub fn with_min_idle(mut self, size: usize) -> Self {
        self.min_idle = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size.max(1);
        self
    }

    /// Bound the wait in `get`
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open
    pub open: usize,
    /// Connections sitting idle
    pub idle: usize,
    /// Connections ever created
    pub created: u64,
    /// Connections closed (expired, failed validation, or shut down)
    pub closed: u64,
    /// Successful acquisitions
    pub acquisitions: u64,
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// Semaphore-bounded connection pool
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<PoolEntry>>,
    permits: Arc<Semaphore>,
    open: AtomicUsize,
    created: AtomicU64,
    closed: AtomicU64,
    acquisitions: AtomicU64,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for SimpleConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SimpleConnectionPool {
    /// Create a pool and open `min_idle` connections.
    ///
    /// Failures while warming up are logged; the pool still comes up and
    /// connects lazily.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        if config.max_size == 0 {
            return Err(Error::config("pool max_size must be at least 1"));
        }
        let pool = Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            factory,
            open: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let warm = pool.config.min_idle.min(pool.config.max_size);
        for _ in 0..warm {
            match pool.open_connection().await {
                Ok(conn) => {
                    let now = Instant::now();
                    pool.idle.lock().push(PoolEntry {
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                }
                Err(e) => {
                    warn!("Pool warm-up connection failed: {}", e);
                    break;
                }
            }
        }

        Ok(pool)
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn open_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.open.fetch_add(1, Ordering::AcqRel);
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn discard(&self, conn: Box<dyn Connection>) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.closed.fetch_add(1, Ordering::Relaxed);
        drop(conn);
    }

    fn expired(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    fn pop_idle(&self) -> Option<PoolEntry> {
        self.idle.lock().pop()
    }

    /// Borrow a connection, waiting for capacity if the pool is full
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::resource("connection pool is shut down"));
        }

        let acquire = self.permits.clone().acquire_owned();
        let permit = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                Error::PoolExhausted {
                    message: format!("no connection available within {}ms", limit.as_millis()),
                }
            })?,
            None => acquire.await,
        }
        .map_err(|_| Error::resource("connection pool is closed"))?;

        while let Some(entry) = self.pop_idle() {
            if self.expired(&entry) {
                debug!("Recycling expired pooled connection");
                self.discard(entry.conn);
                continue;
            }
            if self.config.test_on_borrow && !entry.conn.is_valid().await {
                debug!("Discarding pooled connection that failed validation");
                self.discard(entry.conn);
                continue;
            }
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConnection {
                entry: Some(entry),
                pool: Arc::clone(self),
                _permit: permit,
            });
        }

        let conn = self.open_connection().await?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(PooledConnection {
            entry: Some(PoolEntry {
                conn,
                created_at: now,
                last_used: now,
            }),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn give_back(&self, mut entry: PoolEntry) {
        if self.shutdown.load(Ordering::Acquire) {
            self.discard(entry.conn);
            return;
        }
        entry.last_used = Instant::now();
        self.idle.lock().push(entry);
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            open: self.open.load(Ordering::Acquire),
            idle: self.idle.lock().len(),
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
        }
    }

    /// Close idle connections and refuse further borrows.
    ///
    /// Borrowed connections are closed as they come back.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.permits.close();
        let drained: Vec<PoolEntry> = std::mem::take(&mut *self.idle.lock());
        for entry in drained {
            let _ = entry.conn.close().await;
            self.discard(entry.conn);
        }
    }
}

/// A connection borrowed from a [`SimpleConnectionPool`]
pub struct PooledConnection {
    entry: Option<PoolEntry>,
    pool: Arc<SimpleConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Drop the connection instead of returning it to the pool
    pub fn detach(mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.discard(entry.conn);
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match &self.entry {
            Some(entry) => entry.conn.as_ref(),
            None => unreachable!("pooled connection used after detach"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.give_back(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new("postgres://localhost/test")
            .with_min_idle(2)
            .with_max_size(20)
            .with_acquire_timeout(Some(Duration::from_secs(10)))
            .with_test_on_borrow(false);

        assert_eq!(config.min_idle, 2);
        assert_eq!(config.max_size, 20);
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(10)));
        assert!(!config.test_on_borrow);
    }

    #[test]
    fn test_default_waits_without_timeout() {
        assert_eq!(PoolConfig::default().acquire_timeout, None);
    }

    #[test]
    fn test_max_size_floor() {
        assert_eq!(PoolConfig::default().with_max_size(0).max_size, 1);
    }
}
