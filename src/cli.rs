//! CLI definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::AppConfig;

/// Reconcile ReplicaSets so each carries the `hello=world` label.
#[derive(Parser, Debug, Default)]
#[command(name = "converge")]
#[command(version)]
#[command(
    long_about = "Watches ReplicaSets and the Pods they control, and converges every \
                  ReplicaSet toward carrying the hello=world label."
)]
pub struct Cli {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Manifest files (YAML or JSON) loaded into the store at startup
    #[arg(short, long, env = "CONVERGE_SEED", value_delimiter = ',')]
    pub seed: Vec<PathBuf>,

    /// Concurrent reconcile workers
    #[arg(short, long, env = "CONVERGE_WORKERS")]
    pub workers: Option<usize>,

    /// Deadline for a single reconcile, in milliseconds
    #[arg(long, env = "CONVERGE_RECONCILE_TIMEOUT_MS")]
    pub reconcile_timeout_ms: Option<u64>,

    /// Deadline for each store call, in milliseconds
    #[arg(long, env = "CONVERGE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Time allowed for graceful shutdown, in milliseconds
    #[arg(long, env = "CONVERGE_SHUTDOWN_TIMEOUT_MS")]
    pub shutdown_timeout_ms: Option<u64>,
}

impl Cli {
    /// Layer flags and environment over a loaded config.
    #[must_use]
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(workers) = self.workers {
            config.controller.max_concurrent_reconciles = workers;
        }
        if let Some(ms) = self.reconcile_timeout_ms {
            config.controller.reconcile_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            config.manager.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_timeout_ms {
            config.manager.shutdown_timeout = Duration::from_millis(ms);
        }
        config.seeds.extend(self.seed.iter().cloned());
        config
    }
}
