use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mux::ExchangeConfig;

/// How to launch the bookstore backend and how long to wait on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Backend executable.
    pub command: PathBuf,
    /// Extra arguments passed to the executable.
    pub args: Vec<String>,
    /// Directory the backend runs in (it keeps its data files there).
    pub working_dir: Option<PathBuf>,
    /// Upper bound on each awaited reply line.
    pub reply_timeout_ms: u64,
    /// Quiet period that ends a resync when a failed exchange left an
    /// unknown number of reply lines behind.
    pub resync_grace_ms: u64,
    /// How long `exit` gets before the process is killed.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("./Bookstore"),
            args: Vec::new(),
            working_dir: None,
            reply_timeout_ms: 5000,
            resync_grace_ms: 200,
            shutdown_grace_ms: 2000,
        }
    }
}

impl WorkerConfig {
    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            resync_grace: Duration::from_millis(self.resync_grace_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
