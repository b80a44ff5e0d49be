//! Gateway errors and their mapping onto gRPC status
//!
//! Every failure leaving the service carries an `x-polygate-error-code`
//! entry in the status metadata so callers can branch on the category
//! without parsing messages.

use polygate_bridge::BridgeError;
use polygate_rdbc::error::ErrorCategory;
use thiserror::Error;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::{Code, Status};

/// Metadata key carrying the coded error identifier
pub const ERROR_CODE_KEY: &str = "x-polygate-error-code";

/// Result type for gateway handlers
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coded identifier attached to every error status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    TransientConflict,
    Network,
    SchemaType,
    Structural,
    Resource,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientConflict => "TRANSIENT_CONFLICT",
            Self::Network => "NETWORK",
            Self::SchemaType => "SCHEMA_TYPE",
            Self::Structural => "STRUCTURAL",
            Self::Resource => "RESOURCE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Code and gRPC status code for a category
    pub fn for_category(category: ErrorCategory) -> (Self, Code) {
        match category {
            ErrorCategory::Conflict => (Self::TransientConflict, Code::Aborted),
            ErrorCategory::Connection => (Self::Network, Code::Unavailable),
            ErrorCategory::Timeout => (Self::Network, Code::DeadlineExceeded),
            ErrorCategory::TypeConversion | ErrorCategory::Schema => {
                (Self::SchemaType, Code::FailedPrecondition)
            }
            ErrorCategory::AlreadyExists => (Self::SchemaType, Code::AlreadyExists),
            ErrorCategory::Structural => (Self::Structural, Code::InvalidArgument),
            ErrorCategory::PoolExhausted | ErrorCategory::Resource => {
                (Self::Resource, Code::ResourceExhausted)
            }
            ErrorCategory::Query
            | ErrorCategory::Transaction
            | ErrorCategory::Configuration
            | ErrorCategory::Other => (Self::Internal, Code::Internal),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the gateway service
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Data path failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Malformed request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Row count cross-check failed on an unfiltered read
    #[error("row count mismatch for {table}: sent {sent}, expected {expected}")]
    RowCountMismatch {
        table: String,
        sent: u64,
        expected: u64,
    },

    /// Object store failure
    #[error("object store error: {0}")]
    ObjectStore(String),
}

impl From<polygate_rdbc::Error> for GatewayError {
    fn from(e: polygate_rdbc::Error) -> Self {
        Self::Bridge(BridgeError::Database(e))
    }
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Bridge(e) => e.category(),
            Self::InvalidRequest(_) => ErrorCategory::Structural,
            Self::RowCountMismatch { .. } => ErrorCategory::Resource,
            Self::ObjectStore(_) => ErrorCategory::Resource,
        }
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::for_category(self.category()).0
    }
}

impl From<GatewayError> for Status {
    fn from(e: GatewayError) -> Self {
        let (code, grpc) = ErrorCode::for_category(e.category());
        let mut metadata = MetadataMap::new();
        metadata.insert(ERROR_CODE_KEY, MetadataValue::from_static(code.as_str()));
        Status::with_metadata(grpc, e.to_string(), metadata)
    }
}

/// Read the coded identifier back out of a status
pub fn error_code(status: &Status) -> Option<&str> {
    status
        .metadata()
        .get(ERROR_CODE_KEY)
        .and_then(|v| v.to_str().ok())
}
