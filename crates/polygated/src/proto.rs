//! Wire messages for the `polygate.v1.Gateway` service
//!
//! Declared directly as prost messages; `build.rs` generates the tonic
//! client and server around them.

/// Connection parameters for one backend
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectionProfile {
    /// `mysql`, `postgres`, or `olap`
    #[prost(string, tag = "1")]
    pub dialect: String,
    #[prost(string, tag = "2")]
    pub host: String,
    /// 0 selects the dialect default
    #[prost(uint32, tag = "3")]
    pub port: u32,
    #[prost(string, tag = "4")]
    pub user: String,
    #[prost(string, tag = "5")]
    pub secret: String,
    #[prost(string, tag = "6")]
    pub database: String,
    /// `disabled`, `require`, `verify-ca`, or `verify-full`
    #[prost(string, tag = "7")]
    pub tls_mode: String,
    #[prost(string, tag = "8")]
    pub ca_cert_path: String,
    #[prost(string, tag = "9")]
    pub client_cert_path: String,
    #[prost(string, tag = "10")]
    pub client_key_path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRowsRequest {
    #[prost(message, optional, tag = "1")]
    pub connection: Option<ConnectionProfile>,
    #[prost(string, tag = "2")]
    pub table: String,
    /// Empty selects every column
    #[prost(string, repeated, tag = "3")]
    pub columns: Vec<String>,
    /// Raw query; overrides `table`, `columns` and filters when set
    #[prost(string, tag = "4")]
    pub sql: String,
    #[prost(string, repeated, tag = "5")]
    pub filter_columns: Vec<String>,
    #[prost(string, repeated, tag = "6")]
    pub filter_operators: Vec<String>,
    #[prost(string, repeated, tag = "7")]
    pub filter_values: Vec<String>,
    /// Requested rows per frame; 0 uses the configured default
    #[prost(uint32, tag = "8")]
    pub batch_rows: u32,
}

/// One frame of a read or write stream
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireBatch {
    #[prost(string, tag = "1")]
    pub table: String,
    /// Arrow IPC stream bytes, or `EOF`
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: ::bytes::Bytes,
    /// Required on the first frame of a write stream
    #[prost(message, optional, tag = "3")]
    pub connection: Option<ConnectionProfile>,
    #[prost(bool, tag = "4")]
    pub create_table: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableWriteResult {
    #[prost(string, tag = "1")]
    pub table: String,
    #[prost(uint64, tag = "2")]
    pub rows_written: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteAck {
    #[prost(message, repeated, tag = "1")]
    pub tables: Vec<TableWriteResult>,
    #[prost(uint64, tag = "2")]
    pub total_rows: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableInfoRequest {
    #[prost(message, optional, tag = "1")]
    pub connection: Option<ConnectionProfile>,
    #[prost(string, tag = "2")]
    pub table: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub native_type: String,
    #[prost(string, tag = "3")]
    pub canonical_type: String,
    #[prost(bool, tag = "4")]
    pub nullable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableInfo {
    #[prost(uint64, tag = "1")]
    pub row_count: u64,
    #[prost(uint64, tag = "2")]
    pub byte_size: u64,
    #[prost(message, repeated, tag = "3")]
    pub columns: Vec<ColumnInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupCountRequest {
    #[prost(message, optional, tag = "1")]
    pub connection: Option<ConnectionProfile>,
    #[prost(string, tag = "2")]
    pub table: String,
    #[prost(string, repeated, tag = "3")]
    pub group_by: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub filter_columns: Vec<String>,
    #[prost(string, repeated, tag = "5")]
    pub filter_operators: Vec<String>,
    #[prost(string, repeated, tag = "6")]
    pub filter_values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupCountRow {
    /// Group key values rendered as text, in `group_by` order
    #[prost(string, repeated, tag = "1")]
    pub values: Vec<String>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupCountResponse {
    #[prost(message, repeated, tag = "1")]
    pub rows: Vec<GroupCountRow>,
}

/// One piece of an uploaded object; bucket and object are read from the first chunk
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectChunk {
    #[prost(string, tag = "1")]
    pub bucket: String,
    #[prost(string, tag = "2")]
    pub object: String,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: ::bytes::Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectAck {
    #[prost(string, tag = "1")]
    pub bucket: String,
    #[prost(string, tag = "2")]
    pub object: String,
    #[prost(uint64, tag = "3")]
    pub bytes: u64,
}

/// Generated service plumbing
pub mod gateway {
    tonic::include_proto!("polygate.v1.Gateway");
}

pub use gateway::gateway_client::GatewayClient;
pub use gateway::gateway_server::{Gateway, GatewayServer};
