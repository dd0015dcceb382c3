//! Graceful shutdown handling.
//!
//! Handles SIGTERM/SIGINT and broadcasts the shutdown phase to every source
//! and worker through a watch channel, so listeners that subscribe late still
//! observe a shutdown that already started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownSignal {
    /// SIGTERM signal received
    Sigterm,
    /// SIGINT signal received (Ctrl+C)
    Sigint,
    /// Programmatic shutdown requested
    Programmatic,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sigterm => write!(f, "SIGTERM"),
            Self::Sigint => write!(f, "SIGINT"),
            Self::Programmatic => write!(f, "PROGRAMMATIC"),
        }
    }
}

/// Shutdown coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Sources stopped accepting events; in-flight reconciles are finishing
    Draining,
    /// Every controller has stopped
    Complete,
}

/// Shutdown coordinator for the manager and its controllers.
pub struct ShutdownCoordinator {
    phase: watch::Sender<ShutdownPhase>,
    shutdown_initiated: AtomicBool,
}

impl ShutdownCoordinator {
    /// A coordinator in the `Running` phase.
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            phase,
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    /// Get the current shutdown phase
    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// True once any phase past `Running` is reached.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            phase: self.phase.subscribe(),
        }
    }

    /// Initiate graceful shutdown. Returns false if it was already under way.
    pub fn initiate_shutdown(&self, signal: ShutdownSignal) -> bool {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Shutdown already in progress, ignoring duplicate signal");
            return false;
        }

        info!(
            signal = %signal,
            subscribers = self.phase.receiver_count(),
            "Initiating graceful shutdown"
        );
        self.phase.send_replace(ShutdownPhase::Draining);
        true
    }

    /// Record that teardown finished.
    pub fn mark_complete(&self) {
        self.shutdown_initiated.store(true, Ordering::Release);
        self.phase.send_replace(ShutdownPhase::Complete);
        debug!("Shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle that resolves once shutdown starts.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    phase: watch::Receiver<ShutdownPhase>,
}

impl ShutdownListener {
    /// Wait until shutdown has been initiated. Also returns if the
    /// coordinator is dropped.
    pub async fn wait(&mut self) {
        // A closed channel means nobody can ever resume us: treat as shutdown.
        let _ = self
            .phase
            .wait_for(|phase| *phase != ShutdownPhase::Running)
            .await;
    }

    /// True if shutdown has started, without waiting.
    pub fn is_shutdown(&self) -> bool {
        *self.phase.borrow() != ShutdownPhase::Running
    }
}

/// Install OS signal handlers (SIGTERM, SIGINT)
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> tokio::task::JoinHandle<()> {
    info!("Installing OS signal handlers");

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGINT handler");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigterm);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    coordinator.initiate_shutdown(ShutdownSignal::Sigint);
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }

            info!("Received Ctrl+C");
            coordinator.initiate_shutdown(ShutdownSignal::Sigint);
        }
    })
}
