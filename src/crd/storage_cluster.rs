//! StorageCluster CRD
//!
//! The primary desired-state resource. One StorageCluster describes a
//! composite storage platform: a Ceph cluster built from storage device
//! sets, an optional object gateway (NooBaa) and the generated
//! configuration that ties them together.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// StorageCluster CRD
// =============================================================================

/// StorageCluster declares the storage platform that should exist in a
/// namespace. The operator converges every dependent resource toward it.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ocs.openshift.io",
    version = "v1",
    kind = "StorageCluster",
    plural = "storageclusters",
    shortname = "storcluster",
    status = "StorageClusterStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "External", "type": "boolean", "jsonPath": ".spec.externalStorage.enable"}"#,
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    /// Device sets backing the Ceph OSDs
    #[serde(default)]
    pub storage_device_sets: Vec<StorageDeviceSet>,

    /// Consume an externally managed Ceph cluster instead of deploying one
    #[serde(default)]
    pub external_storage: ExternalStorageSpec,

    /// Object gateway settings
    #[serde(default)]
    pub multi_cloud_gateway: Option<MultiCloudGatewaySpec>,

    /// Failure domain override: host, rack or zone
    #[serde(default)]
    pub failure_domain: Option<String>,

    /// Spread OSDs across hosts without relying on failure domains
    #[serde(default)]
    pub flexible_scaling: bool,

    /// Number of Ceph monitors
    #[serde(default = "default_mon_count")]
    pub mon_count: u32,

    /// Extra lines appended to the generated ceph.conf
    #[serde(default)]
    pub ceph_config_overrides: Vec<String>,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// A set of identically provisioned OSD devices
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageDeviceSet {
    /// Device set name, unique within the cluster
    pub name: String,

    /// Number of device groups
    #[serde(default = "default_count")]
    pub count: u32,

    /// Devices per group
    #[serde(default = "default_replica")]
    pub replica: u32,

    /// Whether OSDs may move between nodes
    #[serde(default)]
    pub portable: bool,

    /// Ceph device class (ssd, hdd, nvme)
    #[serde(default)]
    pub device_class: Option<String>,

    /// Storage class used for the data PVCs
    #[serde(default)]
    pub storage_class_name: Option<String>,

    /// Requested size per device (e.g., "512Gi")
    #[serde(default)]
    pub size: Option<String>,
}

/// External storage mode
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStorageSpec {
    #[serde(default)]
    pub enable: bool,
}

/// Object gateway (NooBaa) settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultiCloudGatewaySpec {
    /// "manage" (default), "ignore" or "standalone"
    #[serde(default)]
    pub reconcile_strategy: Option<String>,

    /// Storage class for the NooBaa database volume
    #[serde(default)]
    pub db_storage_class_name: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StorageCluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Option<StorageClusterPhase>,

    /// Conditions, replaced wholesale on every reconcile
    #[serde(default)]
    pub conditions: Vec<StorageClusterCondition>,

    /// Operator version that last reconciled this cluster
    #[serde(default)]
    pub version: Option<String>,

    /// Failure domain in effect
    #[serde(default)]
    pub failure_domain: Option<String>,
}

/// StorageCluster lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub enum StorageClusterPhase {
    Ready,
    Progressing,
    Degraded,
    Error,
}

impl StorageClusterPhase {
    /// Severity rank, higher is worse
    pub fn severity(&self) -> u8 {
        match self {
            StorageClusterPhase::Ready => 0,
            StorageClusterPhase::Progressing => 1,
            StorageClusterPhase::Degraded => 2,
            StorageClusterPhase::Error => 3,
        }
    }

    /// The worse of two phases
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for StorageClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageClusterPhase::Ready => write!(f, "Ready"),
            StorageClusterPhase::Progressing => write!(f, "Progressing"),
            StorageClusterPhase::Degraded => write!(f, "Degraded"),
            StorageClusterPhase::Error => write!(f, "Error"),
        }
    }
}

/// Condition for StorageCluster status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_count() -> u32 {
    1
}

fn default_replica() -> u32 {
    3
}

fn default_mon_count() -> u32 {
    3
}

// =============================================================================
// Implementations
// =============================================================================

impl StorageCluster {
    /// Whether the cluster consumes external Ceph
    pub fn is_external(&self) -> bool {
        self.spec.external_storage.enable
    }

    /// Whether the object gateway should be reconciled
    pub fn manages_object_gateway(&self) -> bool {
        !matches!(
            self.spec
                .multi_cloud_gateway
                .as_ref()
                .and_then(|m| m.reconcile_strategy.as_deref()),
            Some("ignore")
        )
    }

    /// Whether only the object gateway is deployed
    pub fn is_gateway_standalone(&self) -> bool {
        matches!(
            self.spec
                .multi_cloud_gateway
                .as_ref()
                .and_then(|m| m.reconcile_strategy.as_deref()),
            Some("standalone")
        )
    }

    /// Phase recorded by the last reconcile, if any
    pub fn recorded_phase(&self) -> Option<StorageClusterPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Conditions recorded by the last reconcile
    pub fn recorded_conditions(&self) -> &[StorageClusterCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for StorageClusterSpec {
    fn default() -> Self {
        Self {
            storage_device_sets: Vec::new(),
            external_storage: ExternalStorageSpec::default(),
            multi_cloud_gateway: None,
            failure_domain: None,
            flexible_scaling: false,
            mon_count: default_mon_count(),
            ceph_config_overrides: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_worst() {
        use StorageClusterPhase::*;
        assert_eq!(Ready.worst(Progressing), Progressing);
        assert_eq!(Error.worst(Degraded), Error);
        assert_eq!(Degraded.worst(Ready), Degraded);
    }

    #[test]
    fn test_gateway_strategy() {
        let mut cluster = StorageCluster::new("ocs", StorageClusterSpec::default());
        assert!(cluster.manages_object_gateway());
        assert!(!cluster.is_gateway_standalone());

        cluster.spec.multi_cloud_gateway = Some(MultiCloudGatewaySpec {
            reconcile_strategy: Some("ignore".into()),
            db_storage_class_name: None,
        });
        assert!(!cluster.manages_object_gateway());
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: StorageClusterSpec = serde_json::from_value(serde_json::json!({
            "storageDeviceSets": [{"name": "ocs-deviceset"}]
        }))
        .unwrap();
        assert_eq!(spec.mon_count, 3);
        assert_eq!(spec.storage_device_sets[0].count, 1);
        assert_eq!(spec.storage_device_sets[0].replica, 3);
        assert!(!spec.external_storage.enable);
    }
}
