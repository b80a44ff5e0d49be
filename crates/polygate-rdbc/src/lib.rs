//! # polygate-rdbc
//!
//! Relational connectivity for the polygate gateway.
//!
//! One dynamically-typed [`Value`] model and one set of async traits
//! ([`Connection`](connection::Connection), [`Transaction`](connection::Transaction),
//! [`RowStream`](connection::RowStream)) cover every backend the gateway
//! talks to:
//!
//! - **PostgreSQL** via tokio-postgres, TLS through rustls
//! - **MySQL** via mysql_async
//! - **OLAP** engines that speak the MySQL wire protocol (Doris, StarRocks)
//!
//! Connections are pooled per [`ConnectionProfile`](registry::ConnectionProfile)
//! in a [`PoolRegistry`](registry::PoolRegistry). Every driver failure is
//! classified into an [`ErrorCategory`](error::ErrorCategory) so callers can
//! decide between retrying, defaulting, and failing.
//!
//! ```rust,ignore
//! use polygate_rdbc::prelude::*;
//!
//! let registry = PoolRegistry::with_default_factories(PoolConfig::default());
//! let profile = ConnectionProfile::new(DatabaseType::MySQL, "db", 3306, "app", "secret", "sales");
//! let pool = registry.get_or_create(&profile).await?;
//! let conn = pool.get().await?;
//! let mut cursor = conn.query_stream("SELECT * FROM orders", &[]).await?;
//! while let Some(row) = cursor.next().await? {
//!     // ...
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL backend (default)
//! - `mysql` - MySQL / OLAP backend (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod pool;
pub mod registry;
pub mod security;
pub mod tls;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::types::{ColumnMetadata, Row, Value};

    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, RowStream, Transaction,
        VecRowStream,
    };

    pub use crate::pool::{PoolConfig, PoolStats, PooledConnection, SimpleConnectionPool};

    pub use crate::registry::{ConnectionProfile, PoolRegistry, ProfileKey};

    pub use crate::dialect::{
        dialect_for, ColumnDef, Filter, FilterOperator, MySqlDialect, OlapDialect,
        PostgresDialect, SqlDialect,
    };

    pub use crate::tls::{SslMode, TlsConfig};
}

pub use error::{Error, Result};
pub use types::Value;
