//! Change Events
//!
//! The normalized form in which the watch runtime hands observed objects to
//! the routing core. Every watched kind is reduced to a [`WatchedObject`] so
//! predicates and mappers can be evaluated without knowing the concrete
//! Rust type behind the object.

use kube::api::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Resource Kinds
// =============================================================================

/// Every resource kind the engine registers a watch for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    StorageCluster,
    CephCluster,
    NooBaa,
    PersistentVolumeClaim,
    Deployment,
    Service,
    ConfigMap,
    StorageProfile,
    CustomResourceDefinition,
    Secret,
    StorageConsumer,
}

impl ResourceKind {
    /// Kind name as it appears in `metadata.ownerReferences[].kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::StorageCluster => "StorageCluster",
            ResourceKind::CephCluster => "CephCluster",
            ResourceKind::NooBaa => "NooBaa",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::StorageProfile => "StorageProfile",
            ResourceKind::CustomResourceDefinition => "CustomResourceDefinition",
            ResourceKind::Secret => "Secret",
            ResourceKind::StorageConsumer => "StorageConsumer",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::CustomResourceDefinition)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Watched Object
// =============================================================================

/// Owner reference as seen on a watched object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerLink {
    pub kind: String,
    pub name: String,
    pub controller: bool,
}

/// Type-erased snapshot of one cached object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedObject {
    pub kind: ResourceKind,
    /// None for cluster-scoped objects
    pub namespace: Option<String>,
    pub name: String,
    pub generation: Option<i64>,
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owners: Vec<OwnerLink>,
    /// Full serialized object, used for nested-field lookups
    pub body: Value,
}

impl WatchedObject {
    /// Create a bare object (mostly useful for tests and benches)
    pub fn new(kind: ResourceKind, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.into(),
            generation: None,
            resource_version: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owners: Vec::new(),
            body: Value::Null,
        }
    }

    /// Snapshot any kube resource
    pub fn from_resource<K>(kind: ResourceKind, obj: &K) -> Self
    where
        K: Resource + Serialize,
    {
        let meta = obj.meta();
        Self {
            kind,
            namespace: obj.namespace(),
            name: obj.name_any(),
            generation: meta.generation,
            resource_version: meta.resource_version.clone(),
            labels: obj.labels().clone(),
            annotations: obj.annotations().clone(),
            owners: obj
                .owner_references()
                .iter()
                .map(|o| OwnerLink {
                    kind: o.kind.clone(),
                    name: o.name.clone(),
                    controller: o.controller.unwrap_or(false),
                })
                .collect(),
            body: serde_json::to_value(obj).unwrap_or(Value::Null),
        }
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_owner(mut self, kind: &str, name: &str) -> Self {
        self.owners.push(OwnerLink {
            kind: kind.to_string(),
            name: name.to_string(),
            controller: true,
        });
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Look up a nested field by dotted path (`status.client.operatorVersion`)
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.body, |value, segment| value.get(segment))
    }

    /// The controlling owner, if it is of the given kind
    pub fn controller_of_kind(&self, kind: &str) -> Option<&OwnerLink> {
        self.owners.iter().find(|o| o.controller && o.kind == kind)
    }
}

// =============================================================================
// Change Event
// =============================================================================

/// One observed create/update/delete notification
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Created(WatchedObject),
    Updated {
        old: WatchedObject,
        new: WatchedObject,
    },
    /// `confirmed` is false when the runtime only inferred the deletion
    /// (the object vanished while the watch was disconnected)
    Deleted {
        object: WatchedObject,
        confirmed: bool,
    },
}

impl ChangeEvent {
    /// The object the event is about (the new version for updates)
    pub fn object(&self) -> &WatchedObject {
        match self {
            ChangeEvent::Created(obj) => obj,
            ChangeEvent::Updated { new, .. } => new,
            ChangeEvent::Deleted { object, .. } => object,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.object().kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object().namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.object().name
    }

    /// Short label for logs and metrics
    pub fn verb(&self) -> &'static str {
        match self {
            ChangeEvent::Created(_) => "create",
            ChangeEvent::Updated { .. } => "update",
            ChangeEvent::Deleted { .. } => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let obj = WatchedObject::new(ResourceKind::StorageConsumer, Some("openshift-storage"), "c1")
            .with_body(json!({"status": {"client": {"operatorVersion": "4.15.0"}}}));

        assert_eq!(
            obj.field("status.client.operatorVersion"),
            Some(&json!("4.15.0"))
        );
        assert_eq!(obj.field("status.client.platformVersion"), None);
        assert_eq!(obj.field("spec.missing.deep"), None);
    }

    #[test]
    fn test_from_resource_copies_metadata() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("onboarding-ticket-key".into()),
                namespace: Some("openshift-storage".into()),
                generation: Some(2),
                owner_references: Some(vec![OwnerReference {
                    api_version: "ocs.openshift.io/v1".into(),
                    kind: "StorageCluster".into(),
                    name: "ocs".into(),
                    uid: "uid-1".into(),
                    controller: Some(true),
                    block_owner_deletion: None,
                }]),
                ..Default::default()
            },
            ..Default::default()
        };

        let obj = WatchedObject::from_resource(ResourceKind::Secret, &secret);
        assert_eq!(obj.name, "onboarding-ticket-key");
        assert_eq!(obj.namespace.as_deref(), Some("openshift-storage"));
        assert_eq!(obj.generation, Some(2));
        assert_eq!(obj.controller_of_kind("StorageCluster").map(|o| o.name.as_str()), Some("ocs"));
        assert_eq!(obj.field("metadata.name"), Some(&json!("onboarding-ticket-key")));
    }

    #[test]
    fn test_event_accessors() {
        let old = WatchedObject::new(ResourceKind::ConfigMap, Some("ns"), "cm").with_generation(1);
        let new = old.clone().with_generation(2);
        let event = ChangeEvent::Updated { old, new };

        assert_eq!(event.kind(), ResourceKind::ConfigMap);
        assert_eq!(event.object().generation, Some(2));
        assert_eq!(event.namespace(), Some("ns"));
        assert_eq!(event.verb(), "update");
    }
}
