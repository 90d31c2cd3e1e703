//! # Configuration (section 6)
//!
//! Everything this crate's core actually reads configuration for: the
//! heartbeat interval and the multiple of it after which a silent
//! channel is culled (section 4.6), the long-transaction warning
//! threshold logged by the engine and snapshotter (sections 4.4/4.5),
//! and a verbose flag. Wire-framing, ports, bind addresses and the rest
//! of a process's listen configuration are out of scope (section 1) --
//! an embedder wires this crate's [`Server`](crate::server::Server) to
//! its own transport however it likes.
use crate::error::Error;
use serde::Deserialize;
use std::time::Duration;

/// Runtime configuration for the transaction engine and liveness monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between expected `Heartbeat` messages from a channel.
    pub heartbeat_interval_secs: u64,
    /// A channel silent for more than this many heartbeat intervals is
    /// culled by the liveness monitor (section 4.6).
    pub heartbeat_timeout_multiplier: u32,
    /// Commits and subscription snapshots slower than this are logged
    /// even when `verbose` is off.
    pub long_transaction_threshold_secs: f64,
    /// When set, every commit is logged regardless of duration.
    pub verbose: bool,
}

impl Config {
    /// The interval a channel is expected to heartbeat within.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// The duration above which a commit or subscription build is
    /// logged as long-running (section 4.6's "4 x heartbeatInterval"
    /// sibling for transactions: a separate, explicitly configured
    /// threshold, per section 6).
    pub fn long_transaction_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.long_transaction_threshold_secs)
    }

    /// Loads a [`Config`] from a JSON file, falling back to
    /// [`Config::default`] values for any field the file omits.
    pub async fn from_file(path: &str) -> Result<Config, Error> {
        let content = tokio::fs::read(path).await.map_err(|e| Error::Store(e.to_string()))?;
        serde_json::from_slice(&content).map_err(|e| Error::Store(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            heartbeat_timeout_multiplier: 4,
            long_transaction_threshold_secs: 1.0,
            verbose: false,
        }
    }
}
