//! Phase and condition aggregation
//!
//! Every convergence run computes the full condition set from scratch out
//! of what it observed during that run. Nothing is patched incrementally,
//! so a condition about a resource that no longer exists cannot survive.
//! The only value carried over from the previous status is a condition's
//! last transition time, and only while its status is unchanged.

use crate::crd::{ConditionStatus, StorageClusterCondition, StorageClusterPhase};
use crate::domain::{DependentKind, ObservedState, ResourceHealth};
use chrono::{DateTime, Utc};

pub const RECONCILE_COMPLETE: &str = "ReconcileComplete";
pub const AVAILABLE: &str = "Available";
pub const PROGRESSING: &str = "Progressing";
pub const DEGRADED: &str = "Degraded";
pub const UPGRADEABLE: &str = "Upgradeable";

/// A dependent resource that could not be applied this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub kind: DependentKind,
    pub name: String,
    pub reason: String,
}

/// Everything one run learned about a target
#[derive(Debug, Clone, Default)]
pub struct Assessment {
    pub observed: Vec<ObservedState>,
    pub failures: Vec<ApplyFailure>,
    /// Set when the desired state itself is malformed
    pub invalid_spec: Option<String>,
}

impl Assessment {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            invalid_spec: Some(reason.into()),
            ..Self::default()
        }
    }

    /// True while any dependent reports a rollout in progress
    pub fn is_settling(&self) -> bool {
        self.observed
            .iter()
            .any(|s| matches!(s.health, ResourceHealth::Progressing(_)))
    }

    /// Worst phase over every input
    pub fn phase(&self) -> StorageClusterPhase {
        let mut phase = StorageClusterPhase::Ready;
        if self.invalid_spec.is_some() {
            phase = phase.worst(StorageClusterPhase::Degraded);
        }
        if !self.failures.is_empty() {
            phase = phase.worst(StorageClusterPhase::Error);
        }
        for state in &self.observed {
            phase = phase.worst(match state.health {
                ResourceHealth::Ready => StorageClusterPhase::Ready,
                ResourceHealth::Progressing(_) => StorageClusterPhase::Progressing,
                ResourceHealth::Degraded(_) => StorageClusterPhase::Degraded,
            });
        }
        phase
    }

    fn degraded(&self) -> Vec<String> {
        self.observed
            .iter()
            .filter_map(|s| match &s.health {
                ResourceHealth::Degraded(why) => Some(format!("{} {}: {}", s.kind, s.name, why)),
                _ => None,
            })
            .collect()
    }

    fn progressing(&self) -> Vec<String> {
        self.observed
            .iter()
            .filter_map(|s| match &s.health {
                ResourceHealth::Progressing(why) => Some(format!("{} {}: {}", s.kind, s.name, why)),
                _ => None,
            })
            .collect()
    }

    /// The complete condition set for this run.
    ///
    /// `previous` is the list recorded by the last run; it only supplies
    /// transition times.
    pub fn conditions(
        &self,
        previous: &[StorageClusterCondition],
        now: DateTime<Utc>,
    ) -> Vec<StorageClusterCondition> {
        use ConditionStatus::{False, True};

        let degraded = self.degraded();
        let progressing = self.progressing();
        let fresh: [(&str, ConditionStatus, &str, String); 5] = if let Some(why) = &self.invalid_spec {
            [
                (RECONCILE_COMPLETE, False, "ReconcileFailed", why.clone()),
                (AVAILABLE, False, "InvalidSpec", why.clone()),
                (PROGRESSING, False, "InvalidSpec", "Waiting for a valid spec".into()),
                (DEGRADED, True, "InvalidSpec", why.clone()),
                (UPGRADEABLE, False, "InvalidSpec", why.clone()),
            ]
        } else if !self.failures.is_empty() {
            let mut failed: Vec<String> = self
                .failures
                .iter()
                .map(|f| format!("{} {}: {}", f.kind, f.name, f.reason))
                .collect();
            failed.sort();
            let message = failed.join("; ");
            [
                (RECONCILE_COMPLETE, False, "ReconcileFailed", message.clone()),
                (AVAILABLE, False, "ApplyFailed", message.clone()),
                (PROGRESSING, True, "Retrying", "Retrying failed resources".into()),
                (DEGRADED, True, "ApplyFailed", message.clone()),
                (UPGRADEABLE, False, "ApplyFailed", message),
            ]
        } else if !degraded.is_empty() {
            let message = degraded.join("; ");
            [
                (RECONCILE_COMPLETE, True, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (AVAILABLE, False, "ResourceDegraded", message.clone()),
                (PROGRESSING, False, "ResourceDegraded", message.clone()),
                (DEGRADED, True, "ResourceDegraded", message.clone()),
                (UPGRADEABLE, False, "ResourceDegraded", message),
            ]
        } else if !progressing.is_empty() {
            let message = progressing.join("; ");
            [
                (RECONCILE_COMPLETE, True, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (AVAILABLE, False, "Init", message.clone()),
                (PROGRESSING, True, "Init", message.clone()),
                (DEGRADED, False, "Init", String::new()),
                (UPGRADEABLE, False, "Init", message),
            ]
        } else {
            [
                (RECONCILE_COMPLETE, True, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (AVAILABLE, True, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (PROGRESSING, False, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (DEGRADED, False, "ReconcileCompleted", "Reconcile completed successfully".into()),
                (UPGRADEABLE, True, "ReconcileCompleted", "Reconcile completed successfully".into()),
            ]
        };

        fresh
            .into_iter()
            .map(|(type_, status, reason, message)| {
                let last_transition_time = previous
                    .iter()
                    .find(|c| c.r#type == type_ && c.status == status)
                    .and_then(|c| c.last_transition_time)
                    .unwrap_or(now);
                StorageClusterCondition {
                    r#type: type_.to_string(),
                    status,
                    last_transition_time: Some(last_transition_time),
                    reason: Some(reason.to_string()),
                    message: (!message.is_empty()).then_some(message),
                }
            })
            .collect()
    }
}

/// Conditions with timestamps stripped, for comparing two runs
pub fn without_timestamps(conditions: &[StorageClusterCondition]) -> Vec<StorageClusterCondition> {
    conditions
        .iter()
        .cloned()
        .map(|mut c| {
            c.last_transition_time = None;
            c
        })
        .collect()
}

/// Look up one condition by type
pub fn find<'a>(
    conditions: &'a [StorageClusterCondition],
    type_: &str,
) -> Option<&'a StorageClusterCondition> {
    conditions.iter().find(|c| c.r#type == type_)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ready(kind: DependentKind, name: &str) -> ObservedState {
        ObservedState::ready(kind, name)
    }

    #[test]
    fn test_all_ready() {
        let a = Assessment {
            observed: vec![
                ready(DependentKind::CephCluster, "ocs-cephcluster"),
                ready(DependentKind::NooBaa, "noobaa"),
            ],
            ..Assessment::default()
        };
        assert_eq!(a.phase(), StorageClusterPhase::Ready);

        let conds = a.conditions(&[], Utc::now());
        assert_eq!(conds.len(), 5);
        assert_eq!(find(&conds, AVAILABLE).unwrap().status, ConditionStatus::True);
        assert_eq!(find(&conds, DEGRADED).unwrap().status, ConditionStatus::False);
    }

    #[test]
    fn test_failure_dominates() {
        let a = Assessment {
            observed: vec![ObservedState {
                kind: DependentKind::NooBaa,
                name: "noobaa".into(),
                health: ResourceHealth::Progressing("pods starting".into()),
            }],
            failures: vec![ApplyFailure {
                kind: DependentKind::CephCluster,
                name: "ocs-cephcluster".into(),
                reason: "conflict".into(),
            }],
            ..Assessment::default()
        };
        assert_eq!(a.phase(), StorageClusterPhase::Error);

        let conds = a.conditions(&[], Utc::now());
        let complete = find(&conds, RECONCILE_COMPLETE).unwrap();
        assert_eq!(complete.status, ConditionStatus::False);
        assert!(complete.message.as_deref().unwrap().contains("ocs-cephcluster"));
    }

    #[test]
    fn test_invalid_spec_is_degraded() {
        let a = Assessment::invalid("no storage device sets");
        assert_eq!(a.phase(), StorageClusterPhase::Degraded);
        let conds = a.conditions(&[], Utc::now());
        assert_eq!(find(&conds, DEGRADED).unwrap().status, ConditionStatus::True);
        assert_eq!(find(&conds, DEGRADED).unwrap().reason.as_deref(), Some("InvalidSpec"));
    }

    #[test]
    fn test_transition_time_carried_over_while_unchanged() {
        let earlier = Utc::now() - Duration::hours(1);
        let now = Utc::now();
        let a = Assessment {
            observed: vec![ready(DependentKind::ConfigMap, "rook-config-override")],
            ..Assessment::default()
        };

        let first = a.conditions(&[], earlier);
        let second = a.conditions(&first, now);
        for c in &second {
            assert_eq!(c.last_transition_time, Some(earlier));
        }

        // Degraded flips: only conditions whose status changed get `now`
        let broken = Assessment {
            observed: vec![ObservedState {
                kind: DependentKind::ConfigMap,
                name: "rook-config-override".into(),
                health: ResourceHealth::Degraded("gone".into()),
            }],
            ..Assessment::default()
        };
        let third = broken.conditions(&second, now);
        assert_eq!(find(&third, DEGRADED).unwrap().last_transition_time, Some(now));
        assert_eq!(
            find(&third, RECONCILE_COMPLETE).unwrap().last_transition_time,
            Some(earlier)
        );
    }

    #[test]
    fn test_conditions_are_fully_replaced() {
        let stale = vec![StorageClusterCondition {
            r#type: "CephClusterMissing".into(),
            status: ConditionStatus::True,
            last_transition_time: None,
            reason: None,
            message: None,
        }];
        let conds = Assessment::default().conditions(&stale, Utc::now());
        assert!(find(&conds, "CephClusterMissing").is_none());
    }

    #[test]
    fn test_without_timestamps_ignores_time() {
        let a = Assessment::default();
        let x = a.conditions(&[], Utc::now() - Duration::minutes(5));
        let y = a.conditions(&[], Utc::now());
        assert_ne!(x, y);
        assert_eq!(without_timestamps(&x), without_timestamps(&y));
    }
}
