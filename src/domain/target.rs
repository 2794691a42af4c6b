//! Convergence targets
//!
//! A [`Target`] is the (namespace, name) identity of one StorageCluster.
//! Every piece of convergence work is keyed on it.

use crate::crd::StorageCluster;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

/// Identity of the primary desired-state resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    pub namespace: String,
    pub name: String,
}

impl Target {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Target for a cached StorageCluster. StorageCluster is namespaced, so
    /// a missing namespace only happens for hand-built objects.
    pub fn of(cluster: &StorageCluster) -> Self {
        Self::new(cluster.namespace().unwrap_or_default(), cluster.name_any())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A pending unit of work. Requests compare equal by target, which is
/// what lets the scheduler collapse duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvergenceRequest {
    pub target: Target,
}

impl ConvergenceRequest {
    pub fn new(target: Target) -> Self {
        Self { target }
    }
}

impl From<Target> for ConvergenceRequest {
    fn from(target: Target) -> Self {
        Self::new(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StorageClusterSpec;

    #[test]
    fn test_target_display() {
        let t = Target::new("openshift-storage", "ocs-storagecluster");
        assert_eq!(t.to_string(), "openshift-storage/ocs-storagecluster");
    }

    #[test]
    fn test_target_of_cluster() {
        let mut cluster = StorageCluster::new("ocs", StorageClusterSpec::default());
        cluster.metadata.namespace = Some("openshift-storage".into());
        assert_eq!(Target::of(&cluster), Target::new("openshift-storage", "ocs"));
    }

    #[test]
    fn test_requests_collapse_by_target() {
        let mut set = std::collections::HashSet::new();
        set.insert(ConvergenceRequest::new(Target::new("ns", "a")));
        set.insert(ConvergenceRequest::new(Target::new("ns", "a")));
        set.insert(Target::new("ns", "b").into());
        assert_eq!(set.len(), 2);
    }
}
