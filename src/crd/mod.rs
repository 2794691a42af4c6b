//! Custom Resource Definitions for the StorageCluster operator
//!
//! This module contains all CRD types:
//! - StorageCluster: the primary desired-state resource
//! - StorageProfile: device-class profiles consumed by a StorageCluster
//! - StorageConsumer: remote clients onboarded onto a StorageCluster

pub mod storage_cluster;
pub mod storage_consumer;
pub mod storage_profile;

pub use storage_cluster::*;
pub use storage_consumer::*;
pub use storage_profile::*;

use kube::CustomResourceExt;

/// All CRD manifests served by the operator, rendered as YAML documents
pub fn crd_manifests() -> Result<String, serde_yaml::Error> {
    let docs = [
        serde_yaml::to_string(&StorageCluster::crd())?,
        serde_yaml::to_string(&StorageProfile::crd())?,
        serde_yaml::to_string(&StorageConsumer::crd())?,
    ];
    Ok(docs.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crd_manifests_render() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("storageclusters.ocs.openshift.io"));
        assert!(yaml.contains("storageprofiles.ocs.openshift.io"));
        assert!(yaml.contains("storageconsumers.ocs.openshift.io"));
        assert_eq!(yaml.matches("---\n").count(), 2);
    }
}
