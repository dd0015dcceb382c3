//! How the dispatcher feeds reconcile outcomes back into the work queue.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{DynamicObject, GroupVersionKind, NamespacedName};
use converge_reconciler::{
    Action, Dispatcher, ExponentialBackoff, RateLimiter, ReconcileError, ReconcileRequest,
    ReconcileResult, Reconciler, WorkQueue,
};
use converge_store::{InMemoryObjectStore, ObjectStore};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LimiterCall {
    When(Duration),
    Forget,
}

/// Exponential backoff that records every call.
struct RecordingLimiter {
    inner: ExponentialBackoff<ReconcileRequest>,
    calls: Arc<Mutex<Vec<LimiterCall>>>,
}

impl RateLimiter<ReconcileRequest> for RecordingLimiter {
    fn when(&mut self, key: &ReconcileRequest) -> Duration {
        let delay = self.inner.when(key);
        self.calls.lock().unwrap().push(LimiterCall::When(delay));
        delay
    }

    fn forget(&mut self, key: &ReconcileRequest) {
        self.calls.lock().unwrap().push(LimiterCall::Forget);
        self.inner.forget(key);
    }

    fn num_requeues(&self, key: &ReconcileRequest) -> u32 {
        self.inner.num_requeues(key)
    }
}

/// Returns pre-scripted outcomes in order, then succeeds.
struct ScriptedReconciler {
    outcomes: Mutex<VecDeque<ReconcileResult>>,
    calls: Mutex<usize>,
}

impl ScriptedReconciler {
    fn new(outcomes: Vec<ReconcileResult>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Reconciler for ScriptedReconciler {
    async fn reconcile(&self, _request: &ReconcileRequest) -> ReconcileResult {
        *self.calls.lock().unwrap() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Action::done()))
    }
}

struct Harness {
    queue: Arc<WorkQueue<ReconcileRequest>>,
    dispatcher: Dispatcher,
    calls: Arc<Mutex<Vec<LimiterCall>>>,
}

fn harness(reconciler: Arc<dyn Reconciler>) -> Harness {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let limiter = RecordingLimiter {
        inner: ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(4)),
        calls: Arc::clone(&calls),
    };
    let queue = Arc::new(WorkQueue::with_rate_limiter(Box::new(limiter)));
    let dispatcher = Dispatcher::new(
        "test-controller",
        reconciler,
        Arc::clone(&queue),
        Duration::from_secs(1),
    );
    Harness {
        queue,
        dispatcher,
        calls,
    }
}

fn rs1() -> ReconcileRequest {
    ReconcileRequest::new("default", "rs1")
}

async fn process(harness: &Harness) {
    let processed = timeout(Duration::from_secs(1), harness.dispatcher.process_next())
        .await
        .unwrap();
    assert!(processed);
}

async fn assert_idle(queue: &WorkQueue<ReconcileRequest>) {
    assert!(timeout(Duration::from_millis(30), queue.get()).await.is_err());
}

#[tokio::test]
async fn given_consecutive_errors_when_processed_then_delays_grow_and_success_resets() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![
        Err(ReconcileError::transient("connection refused")),
        Err(ReconcileError::transient("connection refused")),
        Err(ReconcileError::transient("connection refused")),
        Ok(Action::done()),
        Err(ReconcileError::transient("connection refused")),
    ]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    // Three failures, one success, then one more failure.
    for _ in 0..4 {
        process(&harness).await;
    }
    harness.queue.add(rs1()).await;
    process(&harness).await;

    let ms = Duration::from_millis;
    assert_eq!(
        *harness.calls.lock().unwrap(),
        vec![
            LimiterCall::When(ms(1)),
            LimiterCall::When(ms(2)),
            LimiterCall::When(ms(4)),
            LimiterCall::Forget,
            LimiterCall::When(ms(1)),
        ]
    );
    assert_eq!(reconciler.calls(), 5);
}

#[tokio::test]
async fn given_backoff_at_cap_when_failing_again_then_delay_stays_capped() {
    let reconciler = Arc::new(ScriptedReconciler::new(
        (0..5)
            .map(|_| Err(ReconcileError::transient("still down")))
            .collect(),
    ));
    let harness = harness(reconciler);
    harness.queue.add(rs1()).await;

    for _ in 0..5 {
        process(&harness).await;
    }

    let delays: Vec<_> = harness.calls.lock().unwrap().clone();
    let ms = Duration::from_millis;
    assert_eq!(
        delays,
        vec![
            LimiterCall::When(ms(1)),
            LimiterCall::When(ms(2)),
            LimiterCall::When(ms(4)),
            LimiterCall::When(ms(4)),
            LimiterCall::When(ms(4)),
        ]
    );
}

#[tokio::test]
async fn given_conflict_when_processed_then_requeued_with_backoff() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![Err(
        converge_store::Error::conflict("ReplicaSet", NamespacedName::new("default", "rs1"), "3", "4")
            .into(),
    )]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;
    assert_eq!(harness.queue.num_requeues(&rs1()).await, 1);

    // The retry succeeds and clears the history.
    process(&harness).await;
    assert_eq!(harness.queue.num_requeues(&rs1()).await, 0);
    assert_eq!(reconciler.calls(), 2);
}

#[tokio::test]
async fn given_permanent_error_when_processed_then_not_requeued() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![Err(ReconcileError::permanent(
        "spec.replicas must not be negative",
    ))]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;

    assert_eq!(*harness.calls.lock().unwrap(), vec![LimiterCall::Forget]);
    assert_idle(&harness.queue).await;

    // A new event brings it back.
    harness.queue.add(rs1()).await;
    process(&harness).await;
    assert_eq!(reconciler.calls(), 2);
}

#[tokio::test]
async fn given_requeue_after_when_processed_then_key_returns_after_delay() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![Ok(Action::requeue_after(
        Duration::from_millis(40),
    ))]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;
    assert_eq!(*harness.calls.lock().unwrap(), vec![LimiterCall::Forget]);
    assert!(harness.queue.is_empty().await);

    let start = tokio::time::Instant::now();
    process(&harness).await;
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(reconciler.calls(), 2);
}

#[tokio::test]
async fn given_requeue_after_beyond_instant_range_when_processed_then_key_is_released() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![Ok(Action::requeue_after(
        Duration::MAX,
    ))]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;

    // Not stuck in flight: a new event hands rs1 out straight away.
    harness.queue.add(rs1()).await;
    let next = timeout(Duration::from_millis(200), harness.queue.get()).await;
    assert_eq!(next.unwrap(), Some(rs1()));
}

/// Panics on its first call, then succeeds.
struct PanicsOnce {
    calls: AtomicUsize,
}

#[async_trait]
impl Reconciler for PanicsOnce {
    async fn reconcile(&self, _request: &ReconcileRequest) -> ReconcileResult {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("replicas field missing");
        }
        Ok(Action::done())
    }
}

#[tokio::test]
async fn given_reconciler_panics_when_processed_then_key_is_retried_with_backoff() {
    let reconciler = Arc::new(PanicsOnce {
        calls: AtomicUsize::new(0),
    });
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;
    assert_eq!(
        *harness.calls.lock().unwrap(),
        vec![LimiterCall::When(Duration::from_millis(1))]
    );

    // The retry runs and succeeds.
    process(&harness).await;
    assert_eq!(reconciler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.queue.num_requeues(&rs1()).await, 0);
}

#[tokio::test]
async fn given_requeue_when_processed_then_goes_through_rate_limiter() {
    let reconciler = Arc::new(ScriptedReconciler::new(vec![Ok(Action::requeue())]));
    let harness = harness(reconciler.clone());
    harness.queue.add(rs1()).await;

    process(&harness).await;
    process(&harness).await;

    assert_eq!(
        *harness.calls.lock().unwrap(),
        vec![LimiterCall::When(Duration::from_millis(1)), LimiterCall::Forget]
    );
}

#[tokio::test]
async fn given_event_during_reconcile_when_done_then_key_is_reconciled_again() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let started = Arc::new(tokio::sync::Notify::new());

    struct Gated {
        gate: Arc<tokio::sync::Notify>,
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Reconciler for Gated {
        async fn reconcile(&self, _request: &ReconcileRequest) -> ReconcileResult {
            self.started.notify_one();
            self.gate.notified().await;
            Ok(Action::done())
        }
    }

    let harness = Arc::new(harness(Arc::new(Gated {
        gate: Arc::clone(&gate),
        started: Arc::clone(&started),
    })));
    harness.queue.add(rs1()).await;

    let first = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.dispatcher.process_next().await })
    };
    started.notified().await;

    // An event lands while rs1 is being reconciled.
    harness.queue.add(rs1()).await;
    assert!(harness.queue.is_empty().await);

    gate.notify_one();
    assert!(first.await.unwrap());

    // Dirty: rs1 is handed out again.
    let second = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.dispatcher.process_next().await })
    };
    started.notified().await;
    gate.notify_one();
    assert!(timeout(Duration::from_secs(1), second).await.unwrap().unwrap());
}

/// Fetch-compare-update reconciler over a real store, treating a missing
/// object as already converged.
struct LabelReconciler {
    store: Arc<dyn ObjectStore>,
    gvk: GroupVersionKind,
}

#[async_trait]
impl Reconciler for LabelReconciler {
    async fn reconcile(&self, request: &ReconcileRequest) -> ReconcileResult {
        let current = match self.store.get(&self.gvk, &request.key).await {
            Ok(object) => object,
            Err(err) if err.is_not_found() => return Ok(Action::done()),
            Err(err) => return Err(err.into()),
        };
        if current.label("hello") == Some("world") {
            return Ok(Action::done());
        }
        self.store.update(current.with_label("hello", "world")).await?;
        Ok(Action::done())
    }
}

#[tokio::test]
async fn given_missing_object_when_reconciled_then_success_without_requeue() {
    let store = Arc::new(InMemoryObjectStore::new());
    let harness = harness(Arc::new(LabelReconciler {
        store: store.clone(),
        gvk: GroupVersionKind::gvk("apps", "v1", "ReplicaSet"),
    }));
    harness.queue.add(ReconcileRequest::new("default", "gone")).await;

    process(&harness).await;

    assert_eq!(*harness.calls.lock().unwrap(), vec![LimiterCall::Forget]);
    assert_eq!(
        harness
            .queue
            .num_requeues(&ReconcileRequest::new("default", "gone"))
            .await,
        0
    );
    assert_idle(&harness.queue).await;
}

#[tokio::test]
async fn given_object_when_reconciled_twice_then_second_run_writes_nothing() {
    let gvk = GroupVersionKind::gvk("apps", "v1", "ReplicaSet");
    let store = Arc::new(InMemoryObjectStore::new());
    store
        .create(DynamicObject::new(&gvk, "rs1").within("default"))
        .await
        .unwrap();
    let harness = harness(Arc::new(LabelReconciler {
        store: store.clone(),
        gvk: gvk.clone(),
    }));

    harness.queue.add(rs1()).await;
    process(&harness).await;
    let after_first = store.current_resource_version();

    harness.queue.add(rs1()).await;
    process(&harness).await;

    assert_eq!(store.current_resource_version(), after_first);
    let rs = store.get(&gvk, &rs1().key).await.unwrap();
    assert_eq!(rs.label("hello"), Some("world"));
}
