//! Convergence Work Queue
//!
//! Deduplicating, per-key serialized queue of convergence requests.
//!
//! A target is in at most one of three states at a time:
//! - **pending**: waiting for a worker (FIFO, deduplicated)
//! - **active**: claimed by a worker
//! - **dirty**: active, and requested again while running; it goes back to
//!   pending as soon as the active run completes
//!
//! Any number of requests for one target therefore collapse into at most
//! one pending run plus the one in flight.

use crate::domain::{ConvergenceRequest, Target};
use crate::error::{Error, Result};
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    pending: IndexSet<Target>,
    active: HashSet<Target>,
    dirty: HashSet<Target>,
}

/// Point-in-time queue sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub pending: usize,
    pub active: usize,
    pub dirty: usize,
}

/// Shared work queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Idempotent enqueue. Returns true if the request created new work,
    /// false if it collapsed into work already pending or in flight.
    pub fn enqueue(&self, request: ConvergenceRequest) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        let target = request.target;
        let added = {
            let mut state = self.inner.state.lock();
            if state.active.contains(&target) {
                state.dirty.insert(target.clone())
            } else {
                state.pending.insert(target.clone())
            }
        };
        if added {
            trace!(target = %target, "Enqueued convergence request");
            self.inner.notify.notify_waiters();
        }
        added
    }

    /// Enqueue after `delay` unless the queue shuts down first
    pub fn enqueue_after(&self, request: ConvergenceRequest, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    queue.enqueue(request);
                }
                _ = queue.inner.shutdown.cancelled() => {}
            }
        });
    }

    /// Wait for the next target and claim it. Returns `Ok(None)` once the
    /// queue is shut down.
    pub async fn next(&self) -> Result<Option<Target>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.shutdown.is_cancelled() {
                return Ok(None);
            }
            if let Some(target) = self.try_claim()? {
                return Ok(Some(target));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.shutdown.cancelled() => return Ok(None),
            }
        }
    }

    fn try_claim(&self) -> Result<Option<Target>> {
        let mut state = self.inner.state.lock();
        let target = match state.pending.shift_remove_index(0) {
            Some(t) => t,
            None => return Ok(None),
        };
        if !state.active.insert(target.clone()) {
            return Err(Error::InvariantViolation(format!(
                "{} was pending while already active",
                target
            )));
        }
        debug!(target = %target, "Claimed convergence request");
        Ok(Some(target))
    }

    /// Release a claimed target. If it was requested again while running,
    /// it becomes pending again.
    pub fn done(&self, target: &Target) {
        let requeued = {
            let mut state = self.inner.state.lock();
            state.active.remove(target);
            if state.dirty.remove(target) {
                state.pending.insert(target.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn depth(&self) -> QueueDepth {
        let state = self.inner.state.lock();
        QueueDepth {
            pending: state.pending.len(),
            active: state.active.len(),
            dirty: state.dirty.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str) -> ConvergenceRequest {
        ConvergenceRequest::new(Target::new("ns", name))
    }

    #[test]
    fn test_duplicate_requests_collapse() {
        let queue = WorkQueue::new(CancellationToken::new());
        assert!(queue.enqueue(req("a")));
        for _ in 0..49 {
            assert!(!queue.enqueue(req("a")));
        }
        assert!(queue.enqueue(req("b")));
        assert_eq!(queue.depth().pending, 2);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.enqueue(req("a"));
        queue.enqueue(req("b"));
        queue.enqueue(req("a"));

        assert_eq!(queue.next().await.unwrap().unwrap().name, "a");
        assert_eq!(queue.next().await.unwrap().unwrap().name, "b");
    }

    #[tokio::test]
    async fn test_active_target_is_not_handed_out_twice() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.enqueue(req("a"));
        let claimed = queue.next().await.unwrap().unwrap();

        // Requested again while running: parked as dirty, not pending
        assert!(queue.enqueue(req("a")));
        assert!(!queue.enqueue(req("a")));
        assert_eq!(
            queue.depth(),
            QueueDepth {
                pending: 0,
                active: 1,
                dirty: 1
            }
        );

        queue.done(&claimed);
        assert_eq!(queue.depth().pending, 1);
        assert_eq!(queue.depth().active, 0);
    }

    #[tokio::test]
    async fn test_dirty_target_waits_for_done() {
        use tokio_test::{assert_pending, assert_ready, task};

        let queue = WorkQueue::new(CancellationToken::new());
        queue.enqueue(req("a"));
        let claimed = queue.next().await.unwrap().unwrap();
        queue.enqueue(req("a"));

        let mut second = task::spawn(queue.next());
        assert_pending!(second.poll());

        queue.done(&claimed);
        assert!(second.is_woken());
        let target = assert_ready!(second.poll()).unwrap().unwrap();
        assert_eq!(target, claimed);
    }

    #[tokio::test]
    async fn test_done_without_new_requests_leaves_queue_empty() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.enqueue(req("a"));
        let claimed = queue.next().await.unwrap().unwrap();
        queue.done(&claimed);
        assert_eq!(queue.depth(), QueueDepth::default());
    }

    #[tokio::test]
    async fn test_next_wakes_on_enqueue() {
        let queue = WorkQueue::new(CancellationToken::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(req("late"));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.unwrap().name, "late");
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters_and_rejects_work() {
        let token = CancellationToken::new();
        let queue = WorkQueue::new(token.clone());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        token.cancel();

        let got = waiter.await.unwrap().unwrap();
        assert!(got.is_none());
        assert!(!queue.enqueue(req("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_delay() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.enqueue_after(req("a"), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(queue.depth().pending, 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.depth().pending, 1);
    }
}
