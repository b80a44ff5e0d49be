//! Connection profiles and the process-wide pool registry
//!
//! One pool exists per distinct [`ProfileKey`]. The key hashes every field
//! of the profile, including the content of TLS material, so two callers
//! with identical credentials share a pool and a rotated certificate gets a
//! fresh one.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::{ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::pool::{PoolConfig, SimpleConnectionPool};
use crate::tls::TlsConfig;

/// Everything needed to reach one database as one principal
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    /// Backend family
    pub dialect: DatabaseType,
    /// Server host
    pub host: String,
    /// Server port; `0` selects the dialect default
    pub port: u16,
    /// User name
    pub user: String,
    /// Password
    pub secret: String,
    /// Database (schema) name
    pub database: String,
    /// TLS settings
    pub tls: TlsConfig,
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("user", &self.user)
            .field("secret", &"***")
            .field("database", &self.database)
            .field("tls", &self.tls.mode)
            .finish()
    }
}

impl ConnectionProfile {
    /// Create a profile with TLS disabled
    pub fn new(
        dialect: DatabaseType,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        secret: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            dialect,
            host: host.into(),
            port,
            user: user.into(),
            secret: secret.into(),
            database: database.into(),
            tls: TlsConfig::default(),
        }
    }

    /// Set TLS settings
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Effective port
    pub fn port(&self) -> u16 {
        match (self.port, self.dialect) {
            (0, DatabaseType::PostgreSQL) => 5432,
            (0, DatabaseType::MySQL) => 3306,
            (0, DatabaseType::Olap) => 9030,
            (p, _) => p,
        }
    }

    /// Reject profiles that cannot possibly connect
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::invalid_request("connection host is required"));
        }
        if self.user.is_empty() {
            return Err(Error::invalid_request("connection user is required"));
        }
        self.tls
            .validate()
            .map_err(|e| Error::invalid_request(e.to_string()))
    }

    /// Identity of this profile for pool deduplication
    pub fn key(&self) -> ProfileKey {
        let mut hasher = Sha256::new();
        for part in [
            self.dialect.to_string().as_str(),
            self.host.as_str(),
            &self.port().to_string(),
            self.user.as_str(),
            self.secret.as_str(),
            self.database.as_str(),
            &self.tls.fingerprint(),
        ] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        ProfileKey(hex::encode(hasher.finalize()))
    }

    /// Driver URL for this profile
    pub fn url(&self) -> Result<String> {
        let scheme = match self.dialect {
            DatabaseType::PostgreSQL => "postgres",
            DatabaseType::MySQL | DatabaseType::Olap => "mysql",
        };
        let mut url = url::Url::parse(&format!("{}://{}", scheme, self.host))
            .map_err(|e| Error::invalid_request(format!("invalid host '{}': {}", self.host, e)))?;
        let invalid = |_| Error::invalid_request(format!("cannot build URL for host '{}'", self.host));
        url.set_port(Some(self.port())).map_err(invalid)?;
        url.set_username(&self.user).map_err(invalid)?;
        if !self.secret.is_empty() {
            url.set_password(Some(&self.secret)).map_err(invalid)?;
        }
        url.set_path(&self.database);
        Ok(url.to_string())
    }

    /// Connection config for this profile
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        Ok(ConnectionConfig::new(self.url()?).with_tls(self.tls.clone()))
    }
}

/// SHA-256 identity of a [`ConnectionProfile`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileKey(String);

impl ProfileKey {
    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Pools keyed by profile identity.
///
/// The lock guards only map lookups and inserts. Pools are built outside
/// it; if two callers race to build a pool for the same key, the first
/// insert wins and the other pool is dropped.
pub struct PoolRegistry {
    template: PoolConfig,
    factories: HashMap<DatabaseType, Arc<dyn ConnectionFactory>>,
    pools: Mutex<HashMap<ProfileKey, Arc<SimpleConnectionPool>>>,
}

impl PoolRegistry {
    /// Empty registry; pool sizing comes from `template`
    pub fn new(template: PoolConfig) -> Self {
        Self {
            template,
            factories: HashMap::new(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Registry wired to the compiled-in drivers
    pub fn with_default_factories(template: PoolConfig) -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new(template);
        #[cfg(feature = "postgres")]
        {
            registry = registry.with_factory(
                DatabaseType::PostgreSQL,
                Arc::new(crate::postgres::PgConnectionFactory),
            );
        }
        #[cfg(feature = "mysql")]
        {
            registry = registry
                .with_factory(
                    DatabaseType::MySQL,
                    Arc::new(crate::mysql::MySqlConnectionFactory::new(DatabaseType::MySQL)),
                )
                .with_factory(
                    DatabaseType::Olap,
                    Arc::new(crate::mysql::MySqlConnectionFactory::new(DatabaseType::Olap)),
                );
        }
        registry
    }

    /// Register the factory used for a dialect
    pub fn with_factory(mut self, dialect: DatabaseType, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factories.insert(dialect, factory);
        self
    }

    /// Pool for `profile`, created on first use
    pub async fn get_or_create(&self, profile: &ConnectionProfile) -> Result<Arc<SimpleConnectionPool>> {
        let key = profile.key();
        if let Some(pool) = self.pools.lock().get(&key) {
            return Ok(Arc::clone(pool));
        }

        profile.validate()?;
        let factory = self.factories.get(&profile.dialect).cloned().ok_or_else(|| {
            Error::unsupported(format!("no driver registered for {}", profile.dialect))
        })?;
        let mut connection = profile.connection_config()?;
        connection.connect_timeout_ms = self.template.connection.connect_timeout_ms;
        connection.application_name = self.template.connection.application_name.clone();
        let config = self.template.clone().with_connection(connection);
        let pool = SimpleConnectionPool::new(config, factory).await?;

        let mut pools = self.pools.lock();
        let entry = Arc::clone(pools.entry(key.clone()).or_insert_with(|| {
            info!(key = %key, dialect = %profile.dialect, host = %profile.host, "Created connection pool");
            pool
        }));
        debug!(pools = pools.len(), "Pool registry size");
        Ok(entry)
    }

    /// Number of live pools
    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    /// Whether no pool has been created yet
    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// Close every pool
    pub async fn close_all(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::SslMode;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(DatabaseType::MySQL, "db.internal", 0, "app", "p@ss/word", "sales")
    }

    #[test]
    fn test_key_is_stable_and_field_sensitive() {
        let a = profile();
        assert_eq!(a.key(), profile().key());

        let mut b = profile();
        b.secret = "other".into();
        assert_ne!(a.key(), b.key());

        let c = profile().with_tls(TlsConfig::new(SslMode::Require));
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(profile().port(), 3306);
        let mut pg = profile();
        pg.dialect = DatabaseType::PostgreSQL;
        assert_eq!(pg.port(), 5432);
    }

    #[test]
    fn test_url_escapes_credentials() {
        let url = profile().url().unwrap();
        assert!(url.starts_with("mysql://app:"));
        assert!(url.ends_with("@db.internal:3306/sales"));
        assert!(!url.contains("p@ss/word"));
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", profile());
        assert!(!debug.contains("p@ss"));
    }

    #[test]
    fn test_validate() {
        assert!(profile().validate().is_ok());
        let mut p = profile();
        p.host = " ".into();
        assert!(p.validate().is_err());
    }
}
