//! # polygated
//!
//! gRPC gateway that moves Arrow IPC frames between clients and relational
//! databases. Reads stream framed batches followed by an EOF sentinel;
//! writes accept the same framing and hand each table to the
//! [`TableOperationQueue`](polygate_bridge::queue::TableOperationQueue).

pub mod cli;
pub mod config;
pub mod error;
pub mod object_store;
pub mod proto;
pub mod protocol;
pub mod server;
pub mod service;
pub mod strategy;

pub use cli::Cli;
pub use config::{ConfigHandle, GatewayConfig};
pub use error::{GatewayError, Result};
pub use server::GatewayDaemon;
pub use service::GatewayService;
