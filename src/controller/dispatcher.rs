//! Event Dispatcher
//!
//! Consumes the bounded stream of [`ChangeEvent`]s produced by the watch
//! runtime, gates each event through its kind's predicate, maps it to
//! targets and enqueues the resulting requests.
//!
//! The ingress channel is bounded. When it is full the event is dropped
//! and an overflow flag is raised; the dispatcher answers the flag with a
//! full resync instead of buffering without limit. A periodic resync runs
//! regardless, as the safety net for anything filtering or overflow lost.

use crate::controller::events::ChangeEvent;
use crate::controller::mapper::fan_out;
use crate::controller::queue::WorkQueue;
use crate::controller::registry::WatchTable;
use crate::domain::{ConvergenceRequest, TargetCacheRef};
use crate::metrics::PipelineMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

// =============================================================================
// Ingress Channel
// =============================================================================

/// Result of handing an event to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// Channel full; a full resync has been scheduled instead
    Overflowed,
    /// Dispatcher gone or shutting down
    Closed,
}

/// Producer side of the ingress channel. Cheap to clone; one per watch.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ChangeEvent>,
    overflowed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    metrics: PipelineMetrics,
}

impl EventSender {
    /// Non-blocking send
    pub fn send(&self, event: ChangeEvent) -> SendOutcome {
        if self.shutdown.is_cancelled() {
            return SendOutcome::Closed;
        }
        match self.tx.try_send(event) {
            Ok(()) => SendOutcome::Accepted,
            Err(TrySendError::Full(event)) => {
                if !self.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(
                        kind = %event.kind(),
                        "Event channel full, dropping events until the next resync"
                    );
                }
                self.metrics.overflows.inc();
                SendOutcome::Overflowed
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }
}

/// Consumer side of the ingress channel
pub struct EventReceiver {
    rx: mpsc::Receiver<ChangeEvent>,
    overflowed: Arc<AtomicBool>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Clear and return the overflow flag
    fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }
}

/// Create the bounded ingress channel
pub fn event_channel(
    capacity: usize,
    shutdown: CancellationToken,
    metrics: PipelineMetrics,
) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflowed = Arc::new(AtomicBool::new(false));
    (
        EventSender {
            tx,
            overflowed: overflowed.clone(),
            shutdown,
            metrics,
        },
        EventReceiver { rx, overflowed },
    )
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Why a full resync ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    Periodic,
    Overflow,
}

impl ResyncReason {
    fn as_str(&self) -> &'static str {
        match self {
            ResyncReason::Periodic => "periodic",
            ResyncReason::Overflow => "overflow",
        }
    }
}

/// Routes events from the ingress channel into the work queue
pub struct Dispatcher {
    table: WatchTable,
    queue: WorkQueue,
    cache: TargetCacheRef,
    lookup_timeout: Duration,
    resync_interval: Duration,
    metrics: PipelineMetrics,
}

impl Dispatcher {
    pub fn new(
        table: WatchTable,
        queue: WorkQueue,
        cache: TargetCacheRef,
        lookup_timeout: Duration,
        resync_interval: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            table,
            queue,
            cache,
            lookup_timeout,
            resync_interval,
            metrics,
        }
    }

    /// Route one event. Returns the number of requests it produced
    /// (including those that collapsed into pending work).
    pub async fn route(&self, event: &ChangeEvent) -> usize {
        let kind = event.kind();
        let registration = match self.table.get(kind) {
            Some(r) => r,
            None => {
                debug!(kind = %kind, "Event for unregistered kind");
                self.metrics.event(kind.as_str(), "unregistered");
                return 0;
            }
        };

        if !registration.admits(event) {
            trace!(
                kind = %kind,
                name = %event.name(),
                verb = event.verb(),
                predicate = registration.predicate.name(),
                "Event filtered"
            );
            self.metrics.event(kind.as_str(), "filtered");
            return 0;
        }

        let requests = match registration
            .mapper
            .map(event, self.cache.as_ref(), self.lookup_timeout)
            .await
        {
            Ok(requests) => requests,
            Err(e) => {
                warn!(
                    kind = %kind,
                    name = %event.name(),
                    error = %e,
                    "Unable to map event to StorageClusters, relying on resync"
                );
                self.metrics.event(kind.as_str(), "unmapped");
                return 0;
            }
        };

        debug!(
            kind = %kind,
            name = %event.name(),
            verb = event.verb(),
            requests = requests.len(),
            "Event forwarded"
        );
        self.metrics.event(kind.as_str(), "forwarded");

        let count = requests.len();
        for request in requests {
            self.queue.enqueue(request);
        }
        count
    }

    /// Enqueue every known target
    pub async fn resync(&self, reason: ResyncReason) -> usize {
        self.metrics.resync(reason.as_str());
        let targets = match fan_out(None, self.cache.as_ref(), self.lookup_timeout).await {
            Ok(t) => t,
            Err(e) => {
                warn!(reason = reason.as_str(), error = %e, "Full resync failed to list StorageClusters");
                return 0;
            }
        };
        debug!(reason = reason.as_str(), targets = targets.len(), "Full resync");
        let count = targets.len();
        for target in targets {
            self.queue.enqueue(ConvergenceRequest::new(target));
        }
        count
    }

    /// Process events until shutdown or until every sender is gone
    pub async fn run(self, mut events: EventReceiver, shutdown: CancellationToken) {
        let mut resync = tokio::time::interval_at(
            Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            kinds = self.table.len(),
            resync_secs = self.resync_interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        self.route(&event).await;
                    }
                    None => break,
                },
                _ = resync.tick() => {
                    self.resync(ResyncReason::Periodic).await;
                }
            }

            if events.take_overflow() {
                self.resync(ResyncReason::Overflow).await;
            }
        }

        info!("Dispatcher stopped");
    }
}
