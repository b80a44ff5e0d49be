//! Error types for polygate-rdbc
//!
//! Every failure is classified so callers can pick a policy:
//! - transient write conflicts (duplicate key, lock wait, deadlock) are retried by the batch writer
//! - network-class failures are retried with jittered backoff for idempotent work
//! - structural and resource failures surface immediately

use std::fmt;
use thiserror::Error;

/// Result type for polygate-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// MySQL server error numbers treated as transient write conflicts
/// (1062 duplicate entry, 1205 lock wait timeout, 1213 deadlock).
pub const MYSQL_CONFLICT_CODES: &[u16] = &[1062, 1205, 1213];

/// Postgres SQLSTATEs treated as transient write conflicts.
pub const PG_CONFLICT_STATES: &[&str] = &["23505", "40P01", "55P03", "40001"];

/// MySQL `ER_TABLE_EXISTS_ERROR`
pub const MYSQL_TABLE_EXISTS: u16 = 1050;

/// Postgres `duplicate_table`
pub const PG_DUPLICATE_TABLE: &str = "42P07";

const CONFLICT_SIGNATURES: &[&str] = &[
    "duplicate entry",
    "duplicate key",
    "lock wait timeout",
    "deadlock",
    "could not obtain lock",
    "could not serialize access",
];

const NETWORK_SIGNATURES: &[&str] = &[
    "broken pipe",
    "connection reset",
    "connection refused",
    "connection closed",
    "timed out",
    "timeout",
    "unexpected eof",
    "i/o error",
];

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Duplicate-key / lock-wait / deadlock on write (retriable with fixed backoff)
    Conflict,
    /// Connection-related errors (retriable)
    Connection,
    /// Timeout errors (retriable)
    Timeout,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Schema-related errors
    Schema,
    /// Object already exists (create races)
    AlreadyExists,
    /// Malformed request
    Structural,
    /// Pool exhausted (retriable with backoff)
    PoolExhausted,
    /// Missing cursor, rows or connection
    Resource,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::Connection | Self::Timeout | Self::PoolExhausted
        )
    }
}

/// Main error type for polygate-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        /// Driver error code (MySQL error number or SQLSTATE)
        code: Option<String>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient write conflict
    #[error("write conflict: {message}")]
    WriteConflict {
        message: String,
        code: Option<String>,
    },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Connection pool exhausted
    #[error("pool exhausted: {message}")]
    PoolExhausted { message: String },

    /// Schema error (column mismatch, unmappable layout)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Table not found
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Object already exists
    #[error("already exists: {object}")]
    AlreadyExists { object: String },

    /// Malformed request
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Missing rows, cursor, or connection
    #[error("resource error: {message}")]
    Resource { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::WriteConflict { .. } => ErrorCategory::Conflict,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::PoolExhausted { .. } => ErrorCategory::PoolExhausted,
            Self::Schema { .. } | Self::TableNotFound { .. } => ErrorCategory::Schema,
            Self::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            Self::InvalidRequest { .. } => ErrorCategory::Structural,
            Self::Resource { .. } => ErrorCategory::Resource,
            Self::Unsupported { .. } | Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this is a transient write conflict (duplicate key, lock wait, deadlock).
    ///
    /// Query errors that slipped through without a driver code are matched on
    /// their message text.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::WriteConflict { .. } => true,
            Self::Query { message, .. } | Self::Transaction { message, .. } => {
                has_signature(message, CONFLICT_SIGNATURES)
            }
            _ => false,
        }
    }

    /// Whether this is a transport/network-class failure
    pub fn is_network(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Query { message, .. } | Self::Transaction { message, .. } => {
                has_signature(message, NETWORK_SIGNATURES)
            }
            _ => false,
        }
    }

    /// Whether this reports an object that already exists (create-table races)
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Query { message, .. } => message.to_lowercase().contains("already exists"),
            _ => false,
        }
    }

    /// Classify a driver failure from its code and message.
    ///
    /// `code` is a MySQL error number or a Postgres SQLSTATE.
    pub fn from_driver(message: impl Into<String>, sql: Option<&str>, code: Option<String>) -> Self {
        let message = message.into();
        let code_matches = |mysql: &[u16], pg: &[&str]| {
            code.as_deref().is_some_and(|c| {
                pg.contains(&c) || c.parse::<u16>().is_ok_and(|n| mysql.contains(&n))
            })
        };

        if code_matches(MYSQL_CONFLICT_CODES, PG_CONFLICT_STATES)
            || has_signature(&message, CONFLICT_SIGNATURES)
        {
            return Self::WriteConflict { message, code };
        }
        if code_matches(&[MYSQL_TABLE_EXISTS], &[PG_DUPLICATE_TABLE]) {
            return Self::AlreadyExists { object: message };
        }
        if has_signature(&message, NETWORK_SIGNATURES) {
            return Self::Connection {
                message,
                source: None,
            };
        }
        Self::Query {
            message,
            sql: sql.map(str::to_string),
            code,
        }
    }

    /// Driver error code attached to this error, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } | Self::WriteConflict { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            code: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            code: None,
        }
    }

    /// Create a write conflict error
    pub fn conflict(message: impl Into<String>, code: Option<String>) -> Self {
        Self::WriteConflict {
            message: message.into(),
            code,
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a structural (malformed request) error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a resource error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

fn has_signature(message: &str, signatures: &[&str]) -> bool {
    let lower = message.to_lowercase();
    signatures.iter().any(|s| lower.contains(s))
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => write!(f, "conflict"),
            Self::Connection => write!(f, "connection"),
            Self::Timeout => write!(f, "timeout"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Schema => write!(f, "schema"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::Structural => write!(f, "structural"),
            Self::PoolExhausted => write!(f, "pool_exhausted"),
            Self::Resource => write!(f, "resource"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Conflict.is_retriable());
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());
        assert!(ErrorCategory::PoolExhausted.is_retriable());

        assert!(!ErrorCategory::Structural.is_retriable());
        assert!(!ErrorCategory::TypeConversion.is_retriable());
        assert!(!ErrorCategory::Query.is_retriable());
    }

    #[test]
    fn test_mysql_codes_classify_as_conflict() {
        for code in ["1062", "1205", "1213"] {
            let err = Error::from_driver("server said no", None, Some(code.into()));
            assert!(err.is_write_conflict(), "code {code}");
            assert_eq!(err.category(), ErrorCategory::Conflict);
        }
    }

    #[test]
    fn test_pg_states_classify_as_conflict() {
        for code in PG_CONFLICT_STATES {
            let err = Error::from_driver("server said no", None, Some(code.to_string()));
            assert!(err.is_write_conflict(), "state {code}");
        }
    }

    #[test]
    fn test_conflict_by_message_signature() {
        let err = Error::from_driver("Duplicate entry '1' for key 'PRIMARY'", None, None);
        assert!(err.is_write_conflict());

        let err = Error::query("Lock wait timeout exceeded; try restarting transaction");
        assert!(err.is_write_conflict());
    }

    #[test]
    fn test_already_exists() {
        let err = Error::from_driver("Table 't' already exists", None, Some("1050".into()));
        assert!(err.is_already_exists());
        assert!(!err.is_write_conflict());

        let err = Error::from_driver("relation \"t\" already exists", None, Some("42P07".into()));
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_network_signatures() {
        let err = Error::from_driver("write: broken pipe", Some("SELECT 1"), None);
        assert!(err.is_network());
        assert!(Error::timeout("timed out").is_network());
        assert!(!Error::query("syntax error").is_network());
    }

    #[test]
    fn test_plain_query_error_keeps_sql_and_code() {
        let err = Error::from_driver("syntax error", Some("SELEC 1"), Some("42601".into()));
        assert_eq!(err.code(), Some("42601"));
        assert!(matches!(err, Error::Query { sql: Some(ref s), .. } if s == "SELEC 1"));
    }
}
