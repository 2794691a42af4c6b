//! Dependent Resources
//!
//! Desired-state templates for everything a StorageCluster owns, and the
//! Kubernetes implementations of the domain ports.

pub mod adapters;
pub mod templates;

pub use adapters::*;
pub use templates::*;

use crate::crd::StorageCluster;
use crate::domain::{DependentKind, ResourceHealth};
use crate::error::{Error, Result};
use kube::api::{ApiResource, GroupVersionKind};
use kube::Resource;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;

/// Field manager for every server-side apply
pub const FIELD_MANAGER: &str = "storagecluster-operator";

/// Label put on every dependent resource
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label naming the owning StorageCluster
pub const STORAGE_CLUSTER_LABEL: &str = "ocs.openshift.io/storagecluster";

// =============================================================================
// API Resources
// =============================================================================

/// Group/version/kind of a dependent kind
pub fn gvk(kind: DependentKind) -> GroupVersionKind {
    match kind {
        DependentKind::CephCluster => GroupVersionKind::gvk("ceph.rook.io", "v1", "CephCluster"),
        DependentKind::NooBaa => GroupVersionKind::gvk("noobaa.io", "v1alpha1", "NooBaa"),
        DependentKind::ConfigMap => GroupVersionKind::gvk("", "v1", "ConfigMap"),
        DependentKind::Deployment => GroupVersionKind::gvk("apps", "v1", "Deployment"),
        DependentKind::Service => GroupVersionKind::gvk("", "v1", "Service"),
    }
}

pub fn api_resource(kind: DependentKind) -> ApiResource {
    ApiResource::from_gvk(&gvk(kind))
}

/// `apiVersion` string as written in manifests
pub fn api_version(kind: DependentKind) -> String {
    api_resource(kind).api_version
}

// =============================================================================
// Ownership
// =============================================================================

/// Controller owner reference pointing at the StorageCluster.
/// Sets `controller` and `blockOwnerDeletion` so deleting the cluster
/// cascades to everything it owns.
pub fn owner_reference(cluster: &StorageCluster) -> Result<OwnerReference> {
    cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::Internal(format!(
            "StorageCluster {} has no uid",
            cluster.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

// =============================================================================
// Health
// =============================================================================

/// Read the health of an applied object from its returned body
pub fn assess_health(kind: DependentKind, object: &Value) -> ResourceHealth {
    let str_at = |pointer: &str| object.pointer(pointer).and_then(Value::as_str);

    match kind {
        DependentKind::CephCluster => {
            match (str_at("/status/phase"), str_at("/status/ceph/health")) {
                (_, Some("HEALTH_ERR")) => {
                    ResourceHealth::Degraded("Ceph reports HEALTH_ERR".to_string())
                }
                (Some("Ready"), Some("HEALTH_OK")) | (Some("Ready"), None) => ResourceHealth::Ready,
                (Some("Ready"), Some(health)) => {
                    ResourceHealth::Degraded(format!("Ceph reports {}", health))
                }
                (Some("Failure"), _) => ResourceHealth::Degraded(
                    str_at("/status/message")
                        .unwrap_or("CephCluster failed")
                        .to_string(),
                ),
                (phase, _) => ResourceHealth::Progressing(format!(
                    "CephCluster phase {}",
                    phase.unwrap_or("unknown")
                )),
            }
        }
        DependentKind::NooBaa => match str_at("/status/phase") {
            Some("Ready") => ResourceHealth::Ready,
            Some("Rejected") => ResourceHealth::Degraded("NooBaa rejected".to_string()),
            phase => ResourceHealth::Progressing(format!(
                "NooBaa phase {}",
                phase.unwrap_or("unknown")
            )),
        },
        DependentKind::Deployment => {
            let wanted = object
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1);
            let available = object
                .pointer("/status/availableReplicas")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            if available >= wanted {
                ResourceHealth::Ready
            } else {
                ResourceHealth::Progressing(format!("{}/{} replicas available", available, wanted))
            }
        }
        DependentKind::ConfigMap | DependentKind::Service => ResourceHealth::Ready,
    }
}
