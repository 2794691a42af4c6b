//! Convergence Step
//!
//! One run converges one StorageCluster: validate the spec, detect the
//! platform, apply every dependent resource, aggregate phase and
//! conditions from what was observed, write status, and tell the engine
//! what to do next.
//!
//! A run is idempotent. Running it twice with no external change applies
//! the same desired state and produces the same phase and conditions.

use crate::controller::bootstrap::FactsRef;
use crate::controller::conditions::{ApplyFailure, Assessment};
use crate::controller::retry::{RetryConfig, RetryTracker};
use crate::crd::{StorageCluster, StorageClusterCondition, StorageClusterPhase};
use crate::domain::{
    DependentApplierRef, EventRecorderRef, EventSeverity, PlatformProbeRef, StatusSinkRef, Target,
    TargetCacheRef,
};
use crate::error::{Error, ErrorAction, Result};
use crate::resources::{desired_resources, owner_reference, validate};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Contract
// =============================================================================

/// What the engine should do after a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done until the next significant event or resync
    Succeeded,
    /// Run again after the delay
    Requeue(Duration),
    /// Unrecoverable; the engine must stop
    Fatal(String),
}

/// Result of one run
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceOutcome {
    /// None when nothing was evaluated (target gone, or the run aborted
    /// before reaching aggregation)
    pub phase: Option<StorageClusterPhase>,
    pub conditions: Vec<StorageClusterCondition>,
    pub disposition: Disposition,
}

impl ConvergenceOutcome {
    fn skipped() -> Self {
        Self {
            phase: None,
            conditions: Vec::new(),
            disposition: Disposition::Succeeded,
        }
    }

    fn aborted(disposition: Disposition) -> Self {
        Self {
            phase: None,
            conditions: Vec::new(),
            disposition,
        }
    }
}

/// The function the engine drives. Implementations may assume no other
/// run for the same target is in flight.
#[async_trait]
pub trait ConvergenceStep: Send + Sync {
    async fn converge(&self, target: &Target) -> ConvergenceOutcome;
}

/// Event reasons
pub mod reasons {
    pub const READY: &str = "StorageClusterReady";
    pub const PROGRESSING: &str = "StorageClusterProgressing";
    pub const DEGRADED: &str = "StorageClusterDegraded";
    pub const FAILED: &str = "ReconcileFailed";
}

// =============================================================================
// Reconciler
// =============================================================================

/// Collaborators of the convergence step
pub struct ReconcilerDeps {
    pub facts: FactsRef,
    pub cache: TargetCacheRef,
    pub applier: DependentApplierRef,
    pub status: StatusSinkRef,
    pub recorder: EventRecorderRef,
    pub platform: PlatformProbeRef,
}

/// The StorageCluster convergence step
pub struct Reconciler {
    deps: ReconcilerDeps,
    retry: RetryTracker,
    /// Last phase announced per target
    announced: DashMap<Target, StorageClusterPhase>,
}

impl Reconciler {
    pub fn new(deps: ReconcilerDeps, retry: RetryConfig) -> Self {
        Self {
            deps,
            retry: RetryTracker::new(retry),
            announced: DashMap::new(),
        }
    }

    /// Drop per-target state once a target is gone
    fn forget(&self, target: &Target) {
        self.retry.reset(target);
        self.announced.remove(target);
    }

    fn disposition_for(&self, target: &Target, err: &Error) -> Disposition {
        match err.action() {
            ErrorAction::RequeueWithBackoff => Disposition::Requeue(self.retry.next_delay(target)),
            ErrorAction::RequeueAfter(delay) => Disposition::Requeue(delay),
            ErrorAction::NoRequeue => Disposition::Succeeded,
            ErrorAction::Fatal => Disposition::Fatal(err.to_string()),
        }
    }

    /// Apply every dependent resource, continuing past failures
    async fn apply_all(&self, target: &Target, cluster: &StorageCluster) -> Result<Assessment> {
        let platform = self.deps.platform.detect().await?;
        debug!(target = %target, %platform, "Detected platform");

        let owner = owner_reference(cluster)?;
        let desired = desired_resources(cluster, &self.deps.facts, platform)?;

        let mut assessment = Assessment::default();
        for resource in &desired {
            match self.deps.applier.apply(resource, &owner).await {
                Ok(observed) => assessment.observed.push(observed),
                Err(e) => {
                    warn!(
                        target = %target,
                        kind = %resource.kind,
                        name = %resource.name,
                        error = %e,
                        "Failed to apply dependent resource"
                    );
                    if let ErrorAction::Fatal = e.action() {
                        return Err(e);
                    }
                    assessment.failures.push(ApplyFailure {
                        kind: resource.kind,
                        name: resource.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(assessment)
    }

    /// Emit an event when the phase differs from the last one announced
    async fn announce(
        &self,
        target: &Target,
        cluster: &StorageCluster,
        phase: StorageClusterPhase,
        assessment: &Assessment,
    ) {
        let previous = self
            .announced
            .get(target)
            .map(|p| *p)
            .or_else(|| cluster.recorded_phase());
        self.announced.insert(target.clone(), phase);
        if previous == Some(phase) {
            return;
        }

        let (severity, reason) = match phase {
            StorageClusterPhase::Ready => (EventSeverity::Normal, reasons::READY),
            StorageClusterPhase::Progressing => (EventSeverity::Normal, reasons::PROGRESSING),
            StorageClusterPhase::Degraded => (EventSeverity::Warning, reasons::DEGRADED),
            StorageClusterPhase::Error => (EventSeverity::Warning, reasons::FAILED),
        };
        let message = match (&assessment.invalid_spec, assessment.failures.first()) {
            (Some(why), _) => format!("StorageCluster is {}: {}", phase, why),
            (None, Some(failure)) => format!(
                "StorageCluster is {}: {} {} failed: {}",
                phase, failure.kind, failure.name, failure.reason
            ),
            (None, None) => format!("StorageCluster is {}", phase),
        };
        info!(target = %target, from = ?previous, to = %phase, "Phase transition");
        self.deps.recorder.record(target, severity, reason, &message).await;
    }
}

#[async_trait]
impl ConvergenceStep for Reconciler {
    #[instrument(skip_all, fields(target = %target))]
    async fn converge(&self, target: &Target) -> ConvergenceOutcome {
        let cluster = match self.deps.cache.get(target) {
            Some(cluster) => cluster,
            None => {
                debug!("StorageCluster not found, nothing to converge");
                self.forget(target);
                return ConvergenceOutcome::skipped();
            }
        };
        if cluster.metadata.deletion_timestamp.is_some() {
            debug!("StorageCluster is being deleted, leaving cleanup to owner references");
            self.forget(target);
            return ConvergenceOutcome::skipped();
        }

        let assessment = match validate(&cluster) {
            Err(Error::InvalidSpec(why)) => {
                warn!(reason = %why, "Invalid StorageCluster spec");
                Assessment::invalid(why)
            }
            Err(e) => return ConvergenceOutcome::aborted(self.disposition_for(target, &e)),
            Ok(()) => match self.apply_all(target, &cluster).await {
                Ok(assessment) => assessment,
                Err(e) => {
                    let disposition = self.disposition_for(target, &e);
                    if let Disposition::Fatal(_) = disposition {
                        error!(error = %e, "Convergence hit an unrecoverable error");
                    } else {
                        warn!(error = %e, "Convergence aborted before applying resources");
                    }
                    return ConvergenceOutcome::aborted(disposition);
                }
            },
        };

        let phase = assessment.phase();
        let conditions = assessment.conditions(cluster.recorded_conditions(), Utc::now());

        let written = match self.deps.status.set_phase(target, phase).await {
            Ok(()) => self.deps.status.set_conditions(target, &conditions).await,
            Err(e) => Err(e),
        };

        self.announce(target, &cluster, phase, &assessment).await;

        let disposition = if let Err(e) = written {
            warn!(error = %e, "Failed to write status");
            self.disposition_for(target, &e)
        } else if !assessment.failures.is_empty() {
            Disposition::Requeue(self.retry.next_delay(target))
        } else if assessment.is_settling() {
            self.retry.reset(target);
            Disposition::Requeue(self.retry.progress_recheck())
        } else {
            self.retry.reset(target);
            Disposition::Succeeded
        };

        debug!(
            %phase,
            applied = assessment.observed.len(),
            failed = assessment.failures.len(),
            ?disposition,
            "Convergence finished"
        );

        ConvergenceOutcome {
            phase: Some(phase),
            conditions,
            disposition,
        }
    }
}
