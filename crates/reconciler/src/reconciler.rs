//! The pluggable convergence policy.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{ReconcileRequest, ReconcileResult};

/// Converges one object toward its desired state.
///
/// Implementations must be idempotent and level-based: fetch the object named
/// by the request, compare it to what it should be, and write only the
/// difference. The event that queued the request is never passed in.
///
/// A missing object is not a failure; return `Ok(Action::done())`.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Drive the object named by `request` toward its desired state.
    async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileResult;
}

#[async_trait]
impl<R: Reconciler + ?Sized> Reconciler for Arc<R> {
    async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileResult {
        (**self).reconcile(request).await
    }
}

/// Adapts an async closure into a `Reconciler`.
pub struct FnReconciler<F> {
    f: F,
}

impl<F, Fut> FnReconciler<F>
where
    F: Fn(ReconcileRequest) -> Fut + Send + Sync,
    Fut: Future<Output = ReconcileResult> + Send + 'static,
{
    /// Wrap a reconcile closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Reconciler for FnReconciler<F>
where
    F: Fn(ReconcileRequest) -> Fut + Send + Sync,
    Fut: Future<Output = ReconcileResult> + Send + 'static,
{
    async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileResult {
        (self.f)(request.clone()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Action, ReconcileError};

    #[tokio::test]
    async fn test_fn_reconciler_passes_request() {
        let reconciler = FnReconciler::new(|request: ReconcileRequest| async move {
            if request.name() == "broken" {
                Err(ReconcileError::transient("boom"))
            } else {
                Ok(Action::done())
            }
        });

        assert_eq!(
            reconciler
                .reconcile(&ReconcileRequest::new("default", "rs1"))
                .await
                .unwrap(),
            Action::done()
        );
        assert!(reconciler
            .reconcile(&ReconcileRequest::new("default", "broken"))
            .await
            .is_err());
    }
}
