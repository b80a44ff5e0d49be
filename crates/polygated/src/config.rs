//! Gateway configuration
//!
//! YAML on disk with `${VAR}` / `${VAR:-default}` expansion. The running
//! service reads it through a [`ConfigHandle`], which hands out immutable
//! snapshots and is refreshed by [`ConfigHandle::spawn_reload`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use polygate_bridge::codec::CoercionPolicy;
use polygate_bridge::queue::QueueConfig;
use polygate_bridge::retry::DecorrelatedJitter;
use polygate_bridge::sizer::{BatchSizer, DEFAULT_SOFT_LIMIT_BYTES};
use polygate_bridge::type_bridge::TemporalMode;
use polygate_bridge::writer::WriterConfig;
use polygate_rdbc::connection::ConnectionConfig;
use polygate_rdbc::pool::PoolConfig;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub pool: PoolSettings,
    pub writer: WriterConfig,
    pub network_retry: DecorrelatedJitter,
    pub read: ReadConfig,
    pub codec: CodecConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Transport ceiling for one gRPC message
    pub max_message_bytes: usize,
    /// Target size of one outbound frame
    pub soft_batch_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 50051)),
            max_message_bytes: 500 * 1024 * 1024,
            soft_batch_bytes: DEFAULT_SOFT_LIMIT_BYTES,
        }
    }
}

/// Per-profile pool limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_open: usize,
    pub min_idle: usize,
    /// Unset means callers wait for a free connection
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 10,
            min_idle: 0,
            acquire_timeout_ms: None,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Rows per frame before size adjustment
    pub batch_rows: usize,
    pub temporal_mode: TemporalMode,
    /// Cross-check unfiltered reads against `COUNT(*)`
    pub verify_row_count: bool,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            batch_rows: 20_000,
            temporal_mode: TemporalMode::Native,
            verify_row_count: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Fail on values that would otherwise be defaulted
    pub strict: bool,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());
                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.soft_batch_bytes == 0 {
            anyhow::bail!("server.soft_batch_bytes must be greater than 0");
        }
        if self.server.soft_batch_bytes > self.server.max_message_bytes {
            anyhow::bail!(
                "server.soft_batch_bytes ({}) exceeds server.max_message_bytes ({})",
                self.server.soft_batch_bytes,
                self.server.max_message_bytes
            );
        }
        if self.pool.max_open == 0 {
            anyhow::bail!("pool.max_open must be at least 1");
        }
        if self.pool.min_idle > self.pool.max_open {
            anyhow::bail!(
                "pool.min_idle ({}) exceeds pool.max_open ({})",
                self.pool.min_idle,
                self.pool.max_open
            );
        }
        if self.writer.max_batch_args == 0 || self.writer.batch_rows == 0 {
            anyhow::bail!("writer.max_batch_args and writer.batch_rows must be greater than 0");
        }
        if self.writer.retry.max_attempts == 0 {
            anyhow::bail!("writer.retry.max_attempts must be at least 1");
        }
        if self.network_retry.max_attempts == 0 {
            anyhow::bail!("network_retry.max_attempts must be at least 1");
        }
        if self.network_retry.base_delay > self.network_retry.max_delay {
            anyhow::bail!("network_retry.base_delay exceeds network_retry.max_delay");
        }
        if self.read.batch_rows == 0 {
            anyhow::bail!("read.batch_rows must be greater than 0");
        }
        if self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be greater than 0");
        }
        Ok(())
    }

    /// Pool template applied to every connection profile
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
            .with_connection(
                ConnectionConfig::default()
                    .with_connect_timeout(self.pool.connect_timeout_ms)
                    .with_application_name("polygated"),
            )
            .with_max_size(self.pool.max_open)
            .with_min_idle(self.pool.min_idle)
            .with_acquire_timeout(self.pool.acquire_timeout_ms.map(Duration::from_millis))
            .with_idle_timeout(Duration::from_secs(self.pool.idle_timeout_secs))
            .with_max_lifetime(Duration::from_secs(self.pool.max_lifetime_secs))
    }

    pub fn coercion_policy(&self) -> CoercionPolicy {
        if self.codec.strict {
            CoercionPolicy::Strict
        } else {
            CoercionPolicy::Permissive
        }
    }

    pub fn sizer(&self) -> BatchSizer {
        BatchSizer::new(self.server.soft_batch_bytes)
    }
}

/// Shared access to the active configuration
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<GatewayConfig>>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// Handle over a fixed configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            path: None,
        }
    }

    /// Load `path` and remember it for reloads
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let config = GatewayConfig::from_file(&path)?;
        Ok(Self::watching(config, path))
    }

    /// Handle over an already loaded configuration that reloads from `path`
    pub fn watching(config: GatewayConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
            path: Some(path.into()),
        }
    }

    /// The active configuration; later reloads do not affect it
    pub fn snapshot(&self) -> Arc<GatewayConfig> {
        self.current.read().clone()
    }

    /// Re-read the file. On failure the current snapshot is kept.
    pub fn reload(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let config = GatewayConfig::from_file(path)?;
        let mut current = self.current.write();
        if **current == config {
            return Ok(false);
        }
        *current = Arc::new(config);
        Ok(true)
    }

    /// Reload on a fixed interval until `cancel` fires
    pub fn spawn_reload(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match handle.reload() {
                        Ok(true) => info!("Configuration reloaded"),
                        Ok(false) => debug!("Configuration unchanged"),
                        Err(e) => warn!("Configuration reload failed, keeping previous: {}", e),
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("POLYGATE_TEST_BIND", "127.0.0.1:6000");
        let expanded = GatewayConfig::expand_env_vars("bind: ${POLYGATE_TEST_BIND}");
        assert_eq!(expanded, "bind: 127.0.0.1:6000");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("POLYGATE_MISSING_VAR");
        let expanded = GatewayConfig::expand_env_vars("rows: ${POLYGATE_MISSING_VAR:-500}");
        assert_eq!(expanded, "rows: 500");
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_yaml("").unwrap();
        assert_eq!(config.server.max_message_bytes, 500 * 1024 * 1024);
        assert_eq!(config.server.soft_batch_bytes, 3 * 1024 * 1024);
        assert_eq!(config.writer.max_batch_args, 50_000);
        assert_eq!(config.writer.batch_rows, 20_000);
        assert_eq!(config.writer.retry.max_attempts, 3);
        assert_eq!(config.writer.retry.delay, Duration::from_secs(2));
        assert_eq!(config.queue.requeue_delay, Duration::from_millis(50));
        assert_eq!(config.coercion_policy(), CoercionPolicy::Permissive);
        assert!(config.pool.acquire_timeout_ms.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let yaml = r#"
server:
  bind: "127.0.0.1:7000"
  soft_batch_bytes: 1048576
pool:
  max_open: 4
  acquire_timeout_ms: 2500
writer:
  max_batch_args: 60000
  retry:
    max_attempts: 5
    delay: 100
network_retry:
  base_delay: 50
  max_delay: 5000
  max_attempts: 6
read:
  temporal_mode: text
codec:
  strict: true
queue:
  capacity: 8
  requeue_delay: 20
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.bind.port(), 7000);
        assert_eq!(config.sizer().max_message_bytes(), 1_048_576);
        assert_eq!(config.pool_config().max_size, 4);
        assert_eq!(
            config.pool_config().acquire_timeout,
            Some(Duration::from_millis(2500))
        );
        assert_eq!(config.writer.max_batch_args, 60_000);
        assert_eq!(config.writer.batch_rows, 20_000);
        assert_eq!(config.writer.retry.delay, Duration::from_millis(100));
        assert_eq!(config.network_retry.max_attempts, 6);
        assert_eq!(config.read.temporal_mode, TemporalMode::Text);
        assert_eq!(config.coercion_policy(), CoercionPolicy::Strict);
        assert_eq!(config.queue.capacity, 8);
    }

    #[test]
    fn test_validation_failures() {
        assert!(GatewayConfig::from_yaml("pool:\n  max_open: 0\n").is_err());
        assert!(GatewayConfig::from_yaml("server:\n  soft_batch_bytes: 0\n").is_err());
        assert!(GatewayConfig::from_yaml("writer:\n  batch_rows: 0\n").is_err());
        assert!(GatewayConfig::from_yaml("read:\n  temporal_mode: sundial\n").is_err());
    }

    #[test]
    fn test_reload_keeps_snapshot_on_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "read:\n  batch_rows: 100").unwrap();
        let handle = ConfigHandle::load(file.path()).unwrap();
        let before = handle.snapshot();
        assert_eq!(before.read.batch_rows, 100);

        std::fs::write(file.path(), "read:\n  batch_rows: 200\n").unwrap();
        assert!(handle.reload().unwrap());
        assert_eq!(handle.snapshot().read.batch_rows, 200);
        // Earlier snapshots are immutable
        assert_eq!(before.read.batch_rows, 100);

        std::fs::write(file.path(), "read: [not, a, map]").unwrap();
        assert!(handle.reload().is_err());
        assert_eq!(handle.snapshot().read.batch_rows, 200);

    }
}
