//! The process-wide context: store handle, controllers, and teardown.

use std::sync::Arc;

use converge_store::{ObjectStore, TimeoutObjectStore, TracingObjectStore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::ManagerConfig;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::shutdown::{ShutdownCoordinator, ShutdownListener, ShutdownSignal};

/// Owns the shared store handle and every registered controller.
///
/// Built once at startup and passed around explicitly; nothing here is
/// global.
pub struct Manager {
    store: Arc<dyn ObjectStore>,
    controllers: Vec<Controller>,
    coordinator: ShutdownCoordinator,
    config: ManagerConfig,
}

impl Manager {
    /// Wrap `store` with tracing and a per-call deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn new(store: Arc<dyn ObjectStore>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn ObjectStore> = Arc::new(TimeoutObjectStore::new(
            TracingObjectStore::new(store),
            config.request_timeout,
        ));
        Ok(Self {
            store,
            controllers: Vec::new(),
            coordinator: ShutdownCoordinator::new(),
            config,
        })
    }

    /// The store handle sources and reconcilers should share.
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    /// Register a controller to run when the manager starts.
    pub fn add(&mut self, controller: Controller) {
        info!(controller = %controller.name(), "Registered controller");
        self.controllers.push(controller);
    }

    /// Registered controllers, in registration order.
    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.iter()
    }

    /// Run every controller until `shutdown` fires or one of them fails.
    ///
    /// # Errors
    ///
    /// Returns the first controller error (for example a watch that could
    /// not be established), or `ShutdownTimeout` if teardown overruns.
    pub async fn start(self, mut shutdown: ShutdownListener) -> Result<()> {
        let Self {
            controllers,
            coordinator,
            config,
            ..
        } = self;

        info!(controllers = controllers.len(), "Starting manager");
        let mut running = JoinSet::new();
        for controller in controllers {
            running.spawn(controller.start(coordinator.subscribe()));
        }

        let mut failure: Option<Error> = None;
        loop {
            tokio::select! {
                () = shutdown.wait() => break,
                Some(joined) = running.join_next() => {
                    if let Err(err) = flatten(joined) {
                        error!(error = %err, "Controller failed, shutting down");
                        failure = Some(err);
                        break;
                    }
                    warn!("Controller stopped before shutdown");
                }
            }
        }

        coordinator.initiate_shutdown(ShutdownSignal::Programmatic);

        let drained = timeout(config.shutdown_timeout, async {
            let mut first_error = None;
            while let Some(joined) = running.join_next().await {
                if let Err(err) = flatten(joined) {
                    warn!(error = %err, "Controller failed during shutdown");
                    first_error.get_or_insert(err);
                }
            }
            first_error
        })
        .await;

        coordinator.mark_complete();
        match drained {
            Ok(teardown_error) => match failure.or(teardown_error) {
                Some(err) => Err(err),
                None => {
                    info!("Manager stopped");
                    Ok(())
                }
            },
            Err(_) => {
                running.abort_all();
                let timeout_ms =
                    u64::try_from(config.shutdown_timeout.as_millis()).unwrap_or(u64::MAX);
                error!(timeout_ms, "Shutdown timeout exceeded, aborting controllers");
                Err(failure.unwrap_or(Error::ShutdownTimeout { timeout_ms }))
            }
        }
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| Error::task_failed("controller", e.to_string()))?
}
