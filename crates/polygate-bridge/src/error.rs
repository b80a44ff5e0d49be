//! Error types for polygate-bridge

use arrow_schema::ArrowError;
use polygate_rdbc::error::ErrorCategory;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while moving data between drivers and columnar batches
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Database or driver failure
    #[error(transparent)]
    Database(#[from] polygate_rdbc::Error),

    /// Arrow array or IPC failure
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Malformed frame on the wire
    #[error("wire format error: {0}")]
    Wire(String),

    /// Strict-mode coercion failure
    #[error("cannot coerce {found} into {target} for column '{column}'")]
    Coercion {
        /// Column being built
        column: String,
        /// Canonical target type
        target: String,
        /// Kind of the offending value
        found: String,
    },

    /// Operation queue not running or shut down mid-flight
    #[error("queue error: {0}")]
    Queue(String),
}

impl BridgeError {
    /// Create a wire error
    pub fn wire(message: impl Into<String>) -> Self {
        Self::Wire(message.into())
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Classify into the shared taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Database(e) => e.category(),
            Self::Arrow(_) => ErrorCategory::Schema,
            Self::Wire(_) => ErrorCategory::Structural,
            Self::Coercion { .. } => ErrorCategory::TypeConversion,
            Self::Queue(_) => ErrorCategory::Resource,
        }
    }

    /// Whether this is a transient write conflict
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_write_conflict())
    }

    /// Whether this is a network-class failure
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_network())
    }

    /// Whether this reports an object that already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Database(e) if e.is_already_exists())
    }
}
