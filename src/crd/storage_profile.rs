//! StorageProfile CRD
//!
//! A StorageProfile names a device class and the pool/filesystem tuning a
//! StorageCluster should apply for it. Profiles carry no owner reference,
//! so any change re-evaluates every StorageCluster in the namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// StorageProfile describes per-device-class tuning
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ocs.openshift.io",
    version = "v1",
    kind = "StorageProfile",
    plural = "storageprofiles",
    status = "StorageProfileStatus",
    printcolumn = r#"{"name": "DeviceClass", "type": "string", "jsonPath": ".spec.deviceClass"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileSpec {
    /// Ceph device class this profile applies to
    pub device_class: String,

    /// Parameters passed to block pools of this class
    #[serde(default)]
    pub block_pool_parameters: BTreeMap<String, String>,

    /// Parameters passed to the shared filesystem of this class
    #[serde(default)]
    pub shared_filesystem_parameters: BTreeMap<String, String>,
}

/// Status of the StorageProfile
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileStatus {
    #[serde(default)]
    pub phase: Option<String>,
}
