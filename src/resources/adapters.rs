//! Kubernetes adapters for the domain ports

use crate::controller::platform::detect_platform;
use crate::crd::{StorageCluster, StorageClusterCondition, StorageClusterPhase};
use crate::domain::{
    DependentApplier, DesiredResource, EventRecorder, EventSeverity, ObservedState, Platform,
    PlatformProbe, ServerVersion, StatusSink, Target, TargetCache, TargetCacheRef, VersionProbe,
};
use crate::error::{Error, Result};
use crate::resources::{api_resource, assess_health, FIELD_MANAGER};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reporting component on every emitted Event
pub const EVENT_REPORTER: &str = "controller_storagecluster";

// =============================================================================
// Target Cache
// =============================================================================

/// StorageCluster cache backed by a reflector store. Never goes to the
/// API server.
#[derive(Clone)]
pub struct ReflectorCache {
    store: Store<StorageCluster>,
}

impl ReflectorCache {
    pub fn new(store: Store<StorageCluster>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TargetCache for ReflectorCache {
    async fn list_targets(&self, namespace: Option<&str>) -> Result<Vec<Target>> {
        Ok(self
            .store
            .state()
            .iter()
            .filter(|sc| namespace.map_or(true, |ns| sc.namespace().as_deref() == Some(ns)))
            .map(|sc| Target::of(sc))
            .collect())
    }

    fn get(&self, target: &Target) -> Option<Arc<StorageCluster>> {
        self.store
            .get(&ObjectRef::new(&target.name).within(&target.namespace))
    }
}

// =============================================================================
// Dependent Applier
// =============================================================================

/// Server-side apply of dependent resources through the dynamic API
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependentApplier for KubeApplier {
    async fn apply(&self, desired: &DesiredResource, owner: &OwnerReference) -> Result<ObservedState> {
        let failed = |reason: String| Error::ApplyFailed {
            kind: desired.kind.to_string(),
            name: desired.name.clone(),
            reason,
        };

        let mut body = desired.body.clone();
        body["metadata"]["ownerReferences"] = json!([owner]);
        let object: DynamicObject = serde_json::from_value(body)
            .map_err(|e| failed(format!("failed to build object: {}", e)))?;

        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            &desired.namespace,
            &api_resource(desired.kind),
        );
        let applied = api
            .patch(
                &desired.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await
            .map_err(|e| failed(e.to_string()))?;

        let health = assess_health(desired.kind, &serde_json::to_value(&applied)?);
        debug!(kind = %desired.kind, name = %desired.name, ?health, "Applied dependent resource");
        Ok(ObservedState {
            kind: desired.kind,
            name: desired.name.clone(),
            health,
        })
    }
}

// =============================================================================
// Status Sink
// =============================================================================

/// Merge-patches the StorageCluster status subresource
pub struct KubeStatusSink {
    client: Client,
}

impl KubeStatusSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch(&self, target: &Target, status: serde_json::Value) -> Result<()> {
        let api: Api<StorageCluster> = Api::namespaced(self.client.clone(), &target.namespace);
        api.patch_status(
            &target.name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "status": status })),
        )
        .await
        .map_err(|e| Error::StatusUpdate {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[async_trait]
impl StatusSink for KubeStatusSink {
    async fn set_phase(&self, target: &Target, phase: StorageClusterPhase) -> Result<()> {
        self.patch(
            target,
            json!({ "phase": phase, "version": crate::VERSION }),
        )
        .await
    }

    async fn set_conditions(&self, target: &Target, conditions: &[StorageClusterCondition]) -> Result<()> {
        // Merge patch replaces lists wholesale
        self.patch(target, json!({ "conditions": conditions })).await
    }
}

// =============================================================================
// Event Recorder
// =============================================================================

/// Publishes Kubernetes Events on the StorageCluster. Fire-and-forget.
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
    cache: TargetCacheRef,
}

impl KubeEventRecorder {
    pub fn new(client: Client, cache: TargetCacheRef) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: EVENT_REPORTER.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
            cache,
        }
    }

    fn object_ref(&self, target: &Target) -> ObjectReference {
        match self.cache.get(target) {
            Some(cluster) => cluster.object_ref(&()),
            None => ObjectReference {
                api_version: Some(StorageCluster::api_version(&()).to_string()),
                kind: Some(StorageCluster::kind(&()).to_string()),
                namespace: Some(target.namespace.clone()),
                name: Some(target.name.clone()),
                ..ObjectReference::default()
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, target: &Target, severity: EventSeverity, reason: &str, message: &str) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            self.object_ref(target),
        );
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(target = %target, reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Detects the platform from node provider IDs
pub struct NodePlatformProbe {
    client: Client,
}

impl NodePlatformProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformProbe for NodePlatformProbe {
    async fn detect(&self) -> Result<Platform> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::PlatformDetection(e.to_string()))?;
        detect_platform(
            list.items
                .iter()
                .map(|n| n.spec.as_ref().and_then(|s| s.provider_id.as_deref())),
        )
    }
}

/// Discovery `/version` probe
pub struct DiscoveryVersionProbe {
    client: Client,
}

impl DiscoveryVersionProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VersionProbe for DiscoveryVersionProbe {
    async fn server_version(&self) -> Result<ServerVersion> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::VersionProbe(e.to_string()))?;
        Ok(ServerVersion {
            major: info.major,
            minor: info.minor,
            git_version: info.git_version,
        })
    }
}
