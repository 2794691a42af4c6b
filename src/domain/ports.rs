//! Domain Ports - Core trait definitions for the convergence engine
//!
//! These traits define the boundaries between the engine and the cluster.
//! Adapters in [`crate::resources`] implement them against the Kubernetes
//! API; tests implement them in memory.

use crate::crd::{StorageCluster, StorageClusterCondition, StorageClusterPhase};
use crate::domain::target::Target;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// =============================================================================
// Platform
// =============================================================================

/// Infrastructure the cluster runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Aws,
    Azure,
    Gcp,
    IbmCloud,
    OpenStack,
    VSphere,
    BareMetal,
}

impl Platform {
    /// Cloud platforms provide portable block volumes
    pub fn is_cloud(&self) -> bool {
        matches!(
            self,
            Platform::Aws | Platform::Azure | Platform::Gcp | Platform::IbmCloud
        )
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Aws => write!(f, "aws"),
            Platform::Azure => write!(f, "azure"),
            Platform::Gcp => write!(f, "gcp"),
            Platform::IbmCloud => write!(f, "ibmcloud"),
            Platform::OpenStack => write!(f, "openstack"),
            Platform::VSphere => write!(f, "vsphere"),
            Platform::BareMetal => write!(f, "baremetal"),
        }
    }
}

// =============================================================================
// Server Version
// =============================================================================

/// Kubernetes API server version reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: String,
    pub minor: String,
    pub git_version: String,
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.git_version)
    }
}

// =============================================================================
// Dependent Resources
// =============================================================================

/// Kinds of resources a StorageCluster owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependentKind {
    CephCluster,
    NooBaa,
    ConfigMap,
    Deployment,
    Service,
}

impl std::fmt::Display for DependentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependentKind::CephCluster => write!(f, "CephCluster"),
            DependentKind::NooBaa => write!(f, "NooBaa"),
            DependentKind::ConfigMap => write!(f, "ConfigMap"),
            DependentKind::Deployment => write!(f, "Deployment"),
            DependentKind::Service => write!(f, "Service"),
        }
    }
}

/// Desired state of one dependent resource. The body is opaque to the
/// engine; only the applier interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResource {
    pub kind: DependentKind,
    pub namespace: String,
    pub name: String,
    pub body: Value,
}

/// Health of an applied resource as read back from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceHealth {
    Ready,
    Progressing(String),
    Degraded(String),
}

/// Result of one successful apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub kind: DependentKind,
    pub name: String,
    pub health: ResourceHealth,
}

impl ObservedState {
    pub fn ready(kind: DependentKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            health: ResourceHealth::Ready,
        }
    }
}

/// Severity of an operator-visible event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

// =============================================================================
// Ports
// =============================================================================

/// Read access to the local mirror of StorageClusters. Never performs a
/// live round-trip for `get`; `list_targets` may, in which case callers
/// bound it with a timeout.
#[async_trait]
pub trait TargetCache: Send + Sync {
    /// Targets in `namespace`, or in every namespace when `None`
    async fn list_targets(&self, namespace: Option<&str>) -> Result<Vec<Target>>;

    /// Cached StorageCluster for a target
    fn get(&self, target: &Target) -> Option<Arc<StorageCluster>>;
}

/// Applies the desired state of one dependent resource. Must be
/// idempotent; `owner` establishes cascade deletion.
#[async_trait]
pub trait DependentApplier: Send + Sync {
    async fn apply(&self, desired: &DesiredResource, owner: &OwnerReference) -> Result<ObservedState>;
}

/// Overwrite-style status writes
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn set_phase(&self, target: &Target, phase: StorageClusterPhase) -> Result<()>;

    /// Replaces the whole condition list
    async fn set_conditions(&self, target: &Target, conditions: &[StorageClusterCondition]) -> Result<()>;
}

/// Fire-and-forget operator-visible events. Failures are logged by the
/// implementation and never surface to the caller.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, target: &Target, severity: EventSeverity, reason: &str, message: &str);
}

/// Detects the infrastructure platform
#[async_trait]
pub trait PlatformProbe: Send + Sync {
    async fn detect(&self) -> Result<Platform>;
}

/// One-shot discovery of the API server version
#[async_trait]
pub trait VersionProbe: Send + Sync {
    async fn server_version(&self) -> Result<ServerVersion>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type TargetCacheRef = Arc<dyn TargetCache>;
pub type DependentApplierRef = Arc<dyn DependentApplier>;
pub type StatusSinkRef = Arc<dyn StatusSink>;
pub type EventRecorderRef = Arc<dyn EventRecorder>;
pub type PlatformProbeRef = Arc<dyn PlatformProbe>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display() {
        assert_eq!(format!("{}", Platform::Aws), "aws");
        assert_eq!(format!("{}", Platform::BareMetal), "baremetal");
        assert!(Platform::Gcp.is_cloud());
        assert!(!Platform::VSphere.is_cloud());
    }

    #[test]
    fn test_dependent_kind_display() {
        assert_eq!(format!("{}", DependentKind::CephCluster), "CephCluster");
        assert_eq!(format!("{}", DependentKind::NooBaa), "NooBaa");
    }
}
