//! # converge - ReplicaSet label controller
//!
//! ## Startup
//!
//! 1. **Config** - defaults, then the config file, then env and flags
//! 2. **Store** - an in-memory object store, seeded from manifest files
//! 3. **Manager** - registers `foo-controller` and opens its watches
//! 4. **Signals** - SIGTERM/SIGINT start a graceful shutdown
//!
//! A watch that cannot be established at startup is fatal and the process
//! exits non-zero.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use converge::cli::Cli;
use converge::{AppConfig, build_manager, seed_store};
use converge_reconciler::{ShutdownCoordinator, install_signal_handlers};
use converge_store::InMemoryObjectStore;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())
        .map(|config| cli.apply(config))
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        workers = config.controller.max_concurrent_reconciles,
        seeds = config.seeds.len(),
        "converge starting"
    );

    let store = Arc::new(InMemoryObjectStore::new());
    seed_store(store.as_ref(), &config.seeds)
        .await
        .context("Failed to seed the object store")?;

    let manager = build_manager(store, &config).context("Failed to build the manager")?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let _signals = install_signal_handlers(Arc::clone(&coordinator));

    info!(startup = ?start_time.elapsed(), "converge is running. Press Ctrl+C to stop.");
    manager
        .start(coordinator.subscribe())
        .await
        .context("Controller manager stopped with an error")?;

    info!("converge stopped gracefully");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
