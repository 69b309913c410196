//! Startup configuration and process-wide logging setup (§4.H). Everything
//! here runs once, before a `NodeActor` exists: config validation is a hard
//! startup error, never a per-request one.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use submerge_base::{err, Result};

/// A node's launch-time configuration. `node_id` and the quorum parameters
/// are fixed for the process lifetime; nothing here is mutated once the
/// node reaches `Ready`.
#[derive(Clone, Debug)]
pub struct Config {
    pub node_id: i64,
    pub storage_path: PathBuf,
    pub r: usize,
    pub w: usize,
    pub n: usize,
    pub peer_bind: SocketAddr,
    pub client_bind: SocketAddr,
    pub quorum_timeout: Duration,
}

impl Config {
    /// Enforces `R + W > N` and `R, W, N >= 1`. Called once at startup,
    /// before any membership state is created; a violation is a
    /// `ConfigError`, never surfaced to a client.
    pub fn validate(&self) -> Result<()> {
        if self.r == 0 || self.w == 0 || self.n == 0 {
            return Err(err("r, w, and n must all be at least 1"));
        }
        if self.r + self.w <= self.n {
            return Err(err(format!(
                "r + w must exceed n (got r={}, w={}, n={})",
                self.r, self.w, self.n
            )));
        }
        Ok(())
    }

    /// Path to this node's record file, `storage-path/records.db`.
    pub fn record_file(&self) -> PathBuf {
        self.storage_path.join("records.db")
    }
}

/// Initializes `tracing-subscriber` from `RUST_LOG` (defaulting to `info`
/// when unset). Must run before any other part of the process logs
/// anything, per §4.H.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
