//! StorageConsumer CRD
//!
//! Represents a remote client cluster onboarded onto a StorageCluster.
//! Consumers heartbeat into their status constantly; only a change of the
//! reported client operator version is relevant to convergence.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Nested status path watched for operator upgrades on consumers
pub const CONSUMER_OPERATOR_VERSION_PATH: &str = "status.client.operatorVersion";

/// StorageConsumer is a remote client of the storage platform
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ocs.openshift.io",
    version = "v1alpha1",
    kind = "StorageConsumer",
    plural = "storageconsumers",
    status = "StorageConsumerStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageConsumerSpec {
    #[serde(default)]
    pub enable: bool,
}

/// Status of the StorageConsumer
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConsumerStatus {
    #[serde(default)]
    pub state: Option<String>,

    /// Last heartbeat from the client
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default)]
    pub client: Option<ClientStatus>,
}

/// Information reported by the client side
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub operator_version: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
