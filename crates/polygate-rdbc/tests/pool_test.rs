//! Tests for polygate-rdbc pool and registry

use async_trait::async_trait;
use polygate_rdbc::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct MockConnection {
    valid: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        Ok(vec![])
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<u64> {
        Ok(0)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Err(Error::unsupported("mock"))
    }

    async fn query_stream(&self, _sql: &str, _params: &[Value]) -> Result<Box<dyn RowStream>> {
        Ok(Box::new(VecRowStream::new(vec![], vec![])))
    }

    async fn is_valid(&self) -> bool {
        self.valid
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MockFactory {
    connects: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::connection("connection refused"));
        }
        Ok(Box::new(MockConnection { valid: true }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

// ==================== PoolConfig Tests ====================

#[test]
fn test_pool_config_default_waits() {
    let config = PoolConfig::default();

    assert_eq!(config.min_idle, 0);
    assert_eq!(config.max_size, 10);
    assert!(config.acquire_timeout.is_none());
    assert!(config.test_on_borrow);
}

#[test]
fn test_pool_config_builder() {
    let config = PoolConfig::new("mysql://localhost/test")
        .with_min_idle(2)
        .with_max_size(0)
        .with_acquire_timeout(Some(Duration::from_secs(5)))
        .with_idle_timeout(Duration::from_secs(60))
        .with_test_on_borrow(false);

    assert_eq!(config.connection.url, "mysql://localhost/test");
    assert_eq!(config.min_idle, 2);
    assert_eq!(config.max_size, 1);
    assert_eq!(config.acquire_timeout, Some(Duration::from_secs(5)));
    assert_eq!(config.idle_timeout, Duration::from_secs(60));
    assert!(!config.test_on_borrow);
}

// ==================== SimpleConnectionPool Tests ====================

#[tokio::test]
async fn test_pool_warms_up_min_idle() {
    let factory = Arc::new(MockFactory::default());
    let pool = SimpleConnectionPool::new(PoolConfig::default().with_min_idle(3), factory.clone())
        .await
        .unwrap();

    let stats = pool.stats();
    assert_eq!(stats.open, 3);
    assert_eq!(stats.idle, 3);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_pool_reuses_returned_connection() {
    let factory = Arc::new(MockFactory::default());
    let pool = SimpleConnectionPool::new(PoolConfig::default(), factory.clone())
        .await
        .unwrap();

    let conn = pool.get().await.unwrap();
    assert!(conn.is_valid().await);
    drop(conn);

    let _conn = pool.get().await.unwrap();
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().acquisitions, 2);
}

#[tokio::test]
async fn test_pool_get_waits_for_capacity() {
    let factory = Arc::new(MockFactory::default());
    let pool = SimpleConnectionPool::new(PoolConfig::default().with_max_size(1), factory)
        .await
        .unwrap();

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.get().await.map(|_| ()) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should be released")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_pool_acquire_timeout() {
    let factory = Arc::new(MockFactory::default());
    let config = PoolConfig::default()
        .with_max_size(1)
        .with_acquire_timeout(Some(Duration::from_millis(20)));
    let pool = SimpleConnectionPool::new(config, factory).await.unwrap();

    let _held = pool.get().await.unwrap();
    let err = pool.get().await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::PoolExhausted);
}

#[tokio::test]
async fn test_pool_connect_failure_is_surfaced() {
    let factory = Arc::new(MockFactory {
        fail: true,
        ..Default::default()
    });
    let pool = SimpleConnectionPool::new(PoolConfig::default(), factory)
        .await
        .unwrap();

    let err = pool.get().await.err().unwrap();
    assert!(err.is_network());
}

#[tokio::test]
async fn test_pool_close_refuses_borrows() {
    let factory = Arc::new(MockFactory::default());
    let pool = SimpleConnectionPool::new(PoolConfig::default().with_min_idle(1), factory)
        .await
        .unwrap();

    pool.close().await;
    assert_eq!(pool.stats().idle, 0);
    assert!(pool.get().await.is_err());
}

#[tokio::test]
async fn test_detach_discards_connection() {
    let factory = Arc::new(MockFactory::default());
    let pool = SimpleConnectionPool::new(PoolConfig::default(), factory)
        .await
        .unwrap();

    pool.get().await.unwrap().detach();
    let stats = pool.stats();
    assert_eq!(stats.open, 0);
    assert_eq!(stats.closed, 1);
}

// ==================== PoolRegistry Tests ====================

#[tokio::test]
async fn test_registry_deduplicates_by_profile() {
    let registry = PoolRegistry::new(PoolConfig::default())
        .with_factory(DatabaseType::MySQL, Arc::new(MockFactory::default()));
    let profile = ConnectionProfile::new(DatabaseType::MySQL, "db", 3306, "app", "pw", "sales");

    let a = registry.get_or_create(&profile).await.unwrap();
    let b = registry.get_or_create(&profile.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);

    let mut other = profile.clone();
    other.database = "inventory".into();
    let c = registry.get_or_create(&other).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(registry.len(), 2);

    registry.close_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_concurrent_first_use_shares_pool() {
    let registry = Arc::new(
        PoolRegistry::new(PoolConfig::default())
            .with_factory(DatabaseType::MySQL, Arc::new(MockFactory::default())),
    );
    let profile = ConnectionProfile::new(DatabaseType::MySQL, "db", 0, "app", "pw", "sales");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let profile = profile.clone();
        handles.push(tokio::spawn(async move {
            registry.get_or_create(&profile).await.unwrap()
        }));
    }
    let pools: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(registry.len(), 1);
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
}

#[tokio::test]
async fn test_registry_rejects_unregistered_dialect() {
    let registry = PoolRegistry::new(PoolConfig::default());
    let profile = ConnectionProfile::new(DatabaseType::Olap, "fe", 0, "root", "", "dw");

    let err = registry.get_or_create(&profile).await.err().unwrap();
    assert!(matches!(err, Error::Unsupported { .. }));
}

#[tokio::test]
async fn test_registry_validates_profile() {
    let registry = PoolRegistry::new(PoolConfig::default())
        .with_factory(DatabaseType::MySQL, Arc::new(MockFactory::default()));
    let profile = ConnectionProfile::new(DatabaseType::MySQL, "", 0, "app", "pw", "sales");

    let err = registry.get_or_create(&profile).await.err().unwrap();
    assert_eq!(err.category(), ErrorCategory::Structural);
}
