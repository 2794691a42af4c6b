//! Desired-state templates
//!
//! Pure functions from a StorageCluster, the startup [`Facts`] and the
//! detected platform to the full set of dependent resources. Validation of
//! the StorageCluster spec happens here too: a spec that cannot be
//! rendered is reported as [`Error::InvalidSpec`].

use crate::controller::bootstrap::Facts;
use crate::crd::StorageCluster;
use crate::domain::{DependentKind, DesiredResource, Platform};
use crate::error::{Error, Result};
use crate::resources::{api_version, MANAGED_BY_LABEL, STORAGE_CLUSTER_LABEL, FIELD_MANAGER};
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::HashSet;

pub const CEPH_CONFIG_OVERRIDE: &str = "rook-config-override";
pub const NOOBAA_NAME: &str = "noobaa";
pub const METRICS_EXPORTER_NAME: &str = "ocs-metrics-exporter";
pub const METRICS_EXPORTER_PORT: i32 = 8080;

const FAILURE_DOMAINS: &[&str] = &["host", "rack", "zone"];
const GATEWAY_STRATEGIES: &[&str] = &["", "manage", "ignore", "standalone"];

const DEFAULT_CEPH_CONFIG: &[&str] = &[
    "mon_osd_full_ratio = .85",
    "mon_osd_backfillfull_ratio = .8",
    "mon_osd_nearfull_ratio = .75",
    "mon_max_pg_per_osd = 600",
];

pub fn cephcluster_name(cluster: &StorageCluster) -> String {
    format!("{}-cephcluster", cluster.name_any())
}

// =============================================================================
// Validation
// =============================================================================

/// Reject specs that contradict themselves. Retrying cannot fix these;
/// only a new spec can.
pub fn validate(cluster: &StorageCluster) -> Result<()> {
    let spec = &cluster.spec;

    if spec.external_storage.enable && !spec.storage_device_sets.is_empty() {
        return Err(Error::InvalidSpec(
            "storageDeviceSets must be empty when externalStorage is enabled".into(),
        ));
    }

    let mut seen = HashSet::new();
    for set in &spec.storage_device_sets {
        if set.name.is_empty() {
            return Err(Error::InvalidSpec("storageDeviceSet with empty name".into()));
        }
        if !seen.insert(set.name.as_str()) {
            return Err(Error::InvalidSpec(format!(
                "duplicate storageDeviceSet name {}",
                set.name
            )));
        }
        if set.count == 0 || set.replica == 0 {
            return Err(Error::InvalidSpec(format!(
                "storageDeviceSet {} must have a non-zero count and replica",
                set.name
            )));
        }
    }

    if spec.mon_count == 0 || spec.mon_count > 5 || spec.mon_count % 2 == 0 {
        return Err(Error::InvalidSpec(format!(
            "monCount must be 1, 3 or 5, got {}",
            spec.mon_count
        )));
    }

    if let Some(domain) = spec.failure_domain.as_deref() {
        if !FAILURE_DOMAINS.contains(&domain) {
            return Err(Error::InvalidSpec(format!(
                "failureDomain must be one of {:?}, got {}",
                FAILURE_DOMAINS, domain
            )));
        }
    }

    if let Some(strategy) = spec
        .multi_cloud_gateway
        .as_ref()
        .and_then(|m| m.reconcile_strategy.as_deref())
    {
        if !GATEWAY_STRATEGIES.contains(&strategy) {
            return Err(Error::InvalidSpec(format!(
                "unknown multiCloudGateway reconcileStrategy {}",
                strategy
            )));
        }
    }

    for line in &spec.ceph_config_overrides {
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {}
            _ => {
                return Err(Error::InvalidSpec(format!(
                    "cephConfigOverrides entry {:?} is not of the form key = value",
                    line
                )))
            }
        }
    }

    Ok(())
}

/// Failure domain in effect: explicit spec value, otherwise host for
/// flexible scaling, zone on cloud platforms and rack elsewhere
pub fn effective_failure_domain(cluster: &StorageCluster, platform: Platform) -> String {
    if let Some(domain) = &cluster.spec.failure_domain {
        return domain.clone();
    }
    if cluster.spec.flexible_scaling {
        "host".to_string()
    } else if platform.is_cloud() {
        "zone".to_string()
    } else {
        "rack".to_string()
    }
}

// =============================================================================
// Templates
// =============================================================================

/// Every dependent resource of `cluster`, in apply order
pub fn desired_resources(
    cluster: &StorageCluster,
    facts: &Facts,
    platform: Platform,
) -> Result<Vec<DesiredResource>> {
    validate(cluster)?;

    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::Internal(format!("StorageCluster {} has no namespace", cluster.name_any())))?;

    let mut resources = vec![
        config_override(cluster, &namespace),
        ceph_cluster(cluster, facts, platform, &namespace),
    ];
    if cluster.manages_object_gateway() {
        resources.push(noobaa(cluster, facts, &namespace));
    }
    resources.push(metrics_exporter_deployment(cluster, facts, &namespace));
    resources.push(metrics_exporter_service(cluster, &namespace));
    Ok(resources)
}

fn metadata(cluster: &StorageCluster, name: &str, namespace: &str) -> Value {
    json!({
        "name": name,
        "namespace": namespace,
        "labels": {
            MANAGED_BY_LABEL: FIELD_MANAGER,
            STORAGE_CLUSTER_LABEL: cluster.name_any(),
        },
    })
}

fn resource(kind: DependentKind, name: String, namespace: &str, body: Value) -> DesiredResource {
    DesiredResource {
        kind,
        namespace: namespace.to_string(),
        name,
        body,
    }
}

fn config_override(cluster: &StorageCluster, namespace: &str) -> DesiredResource {
    let mut lines = vec!["[global]".to_string()];
    lines.extend(DEFAULT_CEPH_CONFIG.iter().map(|l| l.to_string()));
    lines.extend(cluster.spec.ceph_config_overrides.iter().map(|l| l.trim().to_string()));

    resource(
        DependentKind::ConfigMap,
        CEPH_CONFIG_OVERRIDE.to_string(),
        namespace,
        json!({
            "apiVersion": api_version(DependentKind::ConfigMap),
            "kind": "ConfigMap",
            "metadata": metadata(cluster, CEPH_CONFIG_OVERRIDE, namespace),
            "data": { "config": lines.join("\n") + "\n" },
        }),
    )
}

fn ceph_cluster(
    cluster: &StorageCluster,
    facts: &Facts,
    platform: Platform,
    namespace: &str,
) -> DesiredResource {
    let name = cephcluster_name(cluster);
    let spec = if cluster.is_external() {
        json!({
            "external": { "enable": true },
            "cephVersion": { "image": facts.images.ceph },
            "labels": { "monitoring": { "rook.io/managedBy": cluster.name_any() } },
        })
    } else {
        let device_sets: Vec<Value> = cluster
            .spec
            .storage_device_sets
            .iter()
            .map(|set| {
                json!({
                    "name": set.name,
                    "count": set.count,
                    "replica": set.replica,
                    "portable": set.portable || platform.is_cloud(),
                    "deviceClass": set.device_class,
                    "storageClassName": set.storage_class_name,
                    "size": set.size,
                })
            })
            .collect();
        json!({
            "cephVersion": { "image": facts.images.ceph },
            "dataDirHostPath": "/var/lib/rook",
            "mon": { "count": cluster.spec.mon_count, "allowMultiplePerNode": false },
            "storage": { "storageClassDeviceSets": device_sets },
            "failureDomain": effective_failure_domain(cluster, platform),
            "flexibleScaling": cluster.spec.flexible_scaling,
            "configOverride": CEPH_CONFIG_OVERRIDE,
        })
    };

    resource(
        DependentKind::CephCluster,
        name.clone(),
        namespace,
        json!({
            "apiVersion": api_version(DependentKind::CephCluster),
            "kind": "CephCluster",
            "metadata": metadata(cluster, &name, namespace),
            "spec": spec,
        }),
    )
}

fn noobaa(cluster: &StorageCluster, facts: &Facts, namespace: &str) -> DesiredResource {
    let db_storage_class = cluster
        .spec
        .multi_cloud_gateway
        .as_ref()
        .and_then(|m| m.db_storage_class_name.clone());

    let mut spec = json!({
        "image": facts.images.noobaa_core,
        "dbImage": facts.images.noobaa_db,
        "dbType": "postgres",
    });
    if let Some(class) = db_storage_class {
        spec["dbStorageClass"] = Value::String(class);
    }
    if !cluster.is_gateway_standalone() {
        spec["cephCluster"] = Value::String(cephcluster_name(cluster));
    }

    resource(
        DependentKind::NooBaa,
        NOOBAA_NAME.to_string(),
        namespace,
        json!({
            "apiVersion": api_version(DependentKind::NooBaa),
            "kind": "NooBaa",
            "metadata": metadata(cluster, NOOBAA_NAME, namespace),
            "spec": spec,
        }),
    )
}

fn metrics_exporter_deployment(cluster: &StorageCluster, facts: &Facts, namespace: &str) -> DesiredResource {
    resource(
        DependentKind::Deployment,
        METRICS_EXPORTER_NAME.to_string(),
        namespace,
        json!({
            "apiVersion": api_version(DependentKind::Deployment),
            "kind": "Deployment",
            "metadata": metadata(cluster, METRICS_EXPORTER_NAME, namespace),
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { "app.kubernetes.io/name": METRICS_EXPORTER_NAME } },
                "template": {
                    "metadata": { "labels": { "app.kubernetes.io/name": METRICS_EXPORTER_NAME } },
                    "spec": {
                        "containers": [{
                            "name": METRICS_EXPORTER_NAME,
                            "image": facts.images.metrics_exporter,
                            "args": [format!("--namespaces={}", namespace)],
                            "ports": [{ "name": "metrics", "containerPort": METRICS_EXPORTER_PORT }],
                        }],
                    },
                },
            },
        }),
    )
}

fn metrics_exporter_service(cluster: &StorageCluster, namespace: &str) -> DesiredResource {
    resource(
        DependentKind::Service,
        METRICS_EXPORTER_NAME.to_string(),
        namespace,
        json!({
            "apiVersion": api_version(DependentKind::Service),
            "kind": "Service",
            "metadata": metadata(cluster, METRICS_EXPORTER_NAME, namespace),
            "spec": {
                "selector": { "app.kubernetes.io/name": METRICS_EXPORTER_NAME },
                "ports": [{
                    "name": "metrics",
                    "port": METRICS_EXPORTER_PORT,
                    "targetPort": METRICS_EXPORTER_PORT,
                }],
            },
        }),
    )
}
