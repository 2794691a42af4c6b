//! Convergence Engine
//!
//! Wires the dispatcher, the work queue and a bounded pool of workers
//! around one [`ConvergenceStep`].
//!
//! ```text
//! watch streams ──► EventSender ──► Dispatcher ──► WorkQueue ──► workers ──► ConvergenceStep
//!                   (bounded)       predicate       dedup +        claim
//!                                   + mapper        per-key        guard
//!                                   + resync        serialization
//! ```
//!
//! Two runs for the same target never overlap. The queue guarantees it and
//! the workers check it again through a claim set; a violation stops the
//! whole engine.

use crate::controller::dispatcher::{event_channel, Dispatcher, EventReceiver, EventSender};
use crate::controller::events::ResourceKind;
use crate::controller::queue::WorkQueue;
use crate::controller::reconcile::{ConvergenceStep, Disposition};
use crate::controller::registry::{storage_cluster_watches, WatchOptions, WatchTable};
use crate::controller::retry::RetryConfig;
use crate::domain::{ConvergenceRequest, Target, TargetCacheRef};
use crate::error::{Error, Result};
use crate::metrics::PipelineMetrics;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrent convergence runs (across different targets)
    pub workers: usize,
    /// Capacity of the ingress event channel
    pub event_queue_capacity: usize,
    /// Full resync period. Clamped to [`ControllerConfig::MIN_RESYNC_INTERVAL`].
    pub resync_interval: Duration,
    /// Upper bound for a mapper's cache lookup
    pub lookup_timeout: Duration,
    /// Backoff for transient failures
    pub retry: RetryConfig,
    /// How long in-flight runs may take to finish after shutdown
    pub shutdown_grace: Duration,
    /// Namespace the operator runs in. Namespaced kinds are only watched
    /// there.
    pub operator_namespace: String,
    /// Do not watch NooBaa (CRD not installed)
    pub skip_noobaa_watch: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_queue_capacity: 1024,
            resync_interval: Duration::from_secs(600),
            lookup_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
            shutdown_grace: Duration::from_secs(30),
            operator_namespace: "openshift-storage".to_string(),
            skip_noobaa_watch: false,
        }
    }
}

impl ControllerConfig {
    /// The periodic resync cannot be disabled or made arbitrarily hot
    pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

    pub fn effective_resync_interval(&self) -> Duration {
        self.resync_interval.max(Self::MIN_RESYNC_INTERVAL)
    }

    /// Namespace to watch `kind` in; `None` for cluster-scoped kinds
    pub fn watch_namespace(&self, kind: ResourceKind) -> Option<&str> {
        kind.is_namespaced().then_some(self.operator_namespace.as_str())
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            skip_noobaa: self.skip_noobaa_watch,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    config: ControllerConfig,
    table: WatchTable,
    cache: TargetCacheRef,
    step: Arc<dyn ConvergenceStep>,
    metrics: PipelineMetrics,
    shutdown: CancellationToken,
    queue: WorkQueue,
    sender: EventSender,
    receiver: EventReceiver,
}

impl Engine {
    pub fn new(
        config: ControllerConfig,
        cache: TargetCacheRef,
        step: Arc<dyn ConvergenceStep>,
        metrics: PipelineMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        let table = storage_cluster_watches(&config.watch_options());
        let queue = WorkQueue::new(shutdown.clone());
        let (sender, receiver) =
            event_channel(config.event_queue_capacity, shutdown.clone(), metrics.clone());
        Self {
            config,
            table,
            cache,
            step,
            metrics,
            shutdown,
            queue,
            sender,
            receiver,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handle for the watch runtime to feed events into
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Registered watches; the watch runtime starts one stream per entry
    pub fn table(&self) -> &WatchTable {
        &self.table
    }

    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Run until the shutdown token fires or a run reports a fatal error.
    /// Returns the fatal error, if any.
    pub async fn run(self) -> Result<()> {
        let Engine {
            config,
            table,
            cache,
            step,
            metrics,
            shutdown,
            queue,
            sender,
            receiver,
        } = self;
        drop(sender);

        let dispatcher = Dispatcher::new(
            table,
            queue.clone(),
            cache,
            config.lookup_timeout,
            config.effective_resync_interval(),
            metrics.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run(receiver, shutdown.clone()));

        let claims: Arc<DashSet<Target>> = Arc::new(DashSet::new());
        let mut workers = JoinSet::new();
        for id in 0..config.workers.max(1) {
            workers.spawn(worker(
                id,
                queue.clone(),
                step.clone(),
                claims.clone(),
                metrics.clone(),
                shutdown.clone(),
            ));
        }
        info!(workers = config.workers.max(1), "Convergence engine started");

        shutdown.cancelled().await;
        info!("Convergence engine shutting down");

        let drained = tokio::time::timeout(config.shutdown_grace, async {
            let mut fatal = None;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Err(e)) => {
                        fatal.get_or_insert(e);
                    }
                    Err(e) if e.is_panic() => {
                        fatal.get_or_insert(Error::Internal(format!("worker panicked: {}", e)));
                    }
                    _ => {}
                }
            }
            fatal
        })
        .await;

        if dispatcher.await.is_err() {
            warn!("Dispatcher task did not exit cleanly");
        }

        match drained {
            Ok(Some(e)) => Err(e),
            Ok(None) => {
                info!("Convergence engine stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    grace_secs = config.shutdown_grace.as_secs(),
                    "In-flight convergence runs abandoned after shutdown grace period"
                );
                workers.abort_all();
                Ok(())
            }
        }
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue,
    step: Arc<dyn ConvergenceStep>,
    claims: Arc<DashSet<Target>>,
    metrics: PipelineMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    let result = worker_loop(id, &queue, step.as_ref(), &claims, &metrics).await;
    if let Err(e) = &result {
        error!(worker = id, error = %e, "Fatal error, stopping convergence engine");
        shutdown.cancel();
    }
    result
}

async fn worker_loop(
    id: usize,
    queue: &WorkQueue,
    step: &dyn ConvergenceStep,
    claims: &DashSet<Target>,
    metrics: &PipelineMetrics,
) -> Result<()> {
    while let Some(target) = queue.next().await? {
        if !claims.insert(target.clone()) {
            return Err(Error::InvariantViolation(format!(
                "two convergence runs claimed {}",
                target
            )));
        }

        let started = Instant::now();
        let outcome = step.converge(&target).await;
        metrics
            .reconcile_duration
            .observe(started.elapsed().as_secs_f64());

        claims.remove(&target);
        queue.done(&target);

        match outcome.disposition {
            Disposition::Succeeded => {
                metrics.reconcile("succeeded");
                debug!(worker = id, target = %target, "Convergence succeeded");
            }
            Disposition::Requeue(delay) => {
                metrics.reconcile("requeued");
                debug!(worker = id, target = %target, delay_ms = delay.as_millis() as u64, "Convergence requeued");
                queue.enqueue_after(ConvergenceRequest::new(target), delay);
            }
            Disposition::Fatal(reason) => {
                metrics.reconcile("fatal");
                return Err(Error::InvariantViolation(format!("{}: {}", target, reason)));
            }
        }
    }
    debug!(worker = id, "Worker stopped");
    Ok(())
}
