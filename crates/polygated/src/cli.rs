//! Command-line arguments for the gateway daemon

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::GatewayConfig;

/// polygate - gRPC gateway between columnar clients and relational databases
#[derive(Parser, Debug, Clone)]
#[command(name = "polygated")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // ============ Server Configuration ============
    /// YAML configuration file; defaults apply when absent
    #[arg(short, long, env = "POLYGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address, overrides `server.bind` from the file
    #[arg(short, long, env = "POLYGATE_BIND")]
    pub bind: Option<SocketAddr>,

    /// Seconds between configuration file checks; 0 disables reload
    #[arg(long, default_value = "30", env = "POLYGATE_RELOAD_INTERVAL_SECS")]
    pub reload_interval_secs: u64,

    // ============ Logging ============
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false", env = "POLYGATE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        match self.reload_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
