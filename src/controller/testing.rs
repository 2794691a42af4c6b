//! In-memory implementations of the domain ports for unit tests

use crate::crd::{
    StorageCluster, StorageClusterCondition, StorageClusterPhase, StorageClusterSpec,
    StorageClusterStatus,
};
use crate::domain::{
    DependentApplier, DependentKind, DesiredResource, EventRecorder, EventSeverity, ObservedState,
    Platform, PlatformProbe, ResourceHealth, ServerVersion, StatusSink, Target, TargetCache,
    VersionProbe,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Target Cache
// =============================================================================

#[derive(Default)]
pub struct InMemoryCache {
    clusters: RwLock<BTreeMap<Target, Arc<StorageCluster>>>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: &[(&str, &str)]) -> Self {
        let cache = Self::new();
        for (ns, name) in targets {
            cache.insert(cluster(ns, name, StorageClusterSpec::default()));
        }
        cache
    }

    pub fn insert(&self, cluster: StorageCluster) {
        self.clusters
            .write()
            .insert(Target::of(&cluster), Arc::new(cluster));
    }

    pub fn remove(&self, target: &Target) {
        self.clusters.write().remove(target);
    }

    /// Apply `f` to the cached copy, as a status write-back would
    pub fn update(&self, target: &Target, f: impl FnOnce(&mut StorageCluster)) {
        let mut clusters = self.clusters.write();
        if let Some(existing) = clusters.get(target) {
            let mut updated = existing.as_ref().clone();
            f(&mut updated);
            clusters.insert(target.clone(), Arc::new(updated));
        }
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl TargetCache for InMemoryCache {
    async fn list_targets(&self, namespace: Option<&str>) -> Result<Vec<Target>> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ListFailed {
                kind: "StorageCluster".into(),
                reason: "injected failure".into(),
            });
        }
        Ok(self
            .clusters
            .read()
            .keys()
            .filter(|t| namespace.map_or(true, |ns| t.namespace == ns))
            .cloned()
            .collect())
    }

    fn get(&self, target: &Target) -> Option<Arc<StorageCluster>> {
        self.clusters.read().get(target).cloned()
    }
}

/// Hand-built StorageCluster with a namespace and uid
pub fn cluster(namespace: &str, name: &str, spec: StorageClusterSpec) -> StorageCluster {
    let mut cluster = StorageCluster::new(name, spec);
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.metadata.uid = Some(format!("uid-{}-{}", namespace, name));
    cluster.metadata.generation = Some(1);
    cluster
}

// =============================================================================
// Dependent Applier
// =============================================================================

/// Records every apply; failures and health are configurable per kind
#[derive(Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<(DesiredResource, OwnerReference)>>,
    failing: Mutex<HashSet<DependentKind>>,
    health: Mutex<HashMap<DependentKind, ResourceHealth>>,
}

impl RecordingApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_kind(&self, kind: DependentKind) {
        self.failing.lock().insert(kind);
    }

    pub fn heal_kind(&self, kind: DependentKind) {
        self.failing.lock().remove(&kind);
    }

    pub fn set_health(&self, kind: DependentKind, health: ResourceHealth) {
        self.health.lock().insert(kind, health);
    }

    pub fn applied(&self) -> Vec<DesiredResource> {
        self.applied.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn owners(&self) -> Vec<OwnerReference> {
        self.applied.lock().iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn clear(&self) {
        self.applied.lock().clear();
    }
}

#[async_trait]
impl DependentApplier for RecordingApplier {
    async fn apply(&self, desired: &DesiredResource, owner: &OwnerReference) -> Result<ObservedState> {
        self.applied.lock().push((desired.clone(), owner.clone()));
        if self.failing.lock().contains(&desired.kind) {
            return Err(Error::ApplyFailed {
                kind: desired.kind.to_string(),
                name: desired.name.clone(),
                reason: "injected failure".into(),
            });
        }
        let health = self
            .health
            .lock()
            .get(&desired.kind)
            .cloned()
            .unwrap_or(ResourceHealth::Ready);
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

/// Records status writes and, when given a cache, writes them through so
/// the next run observes them
#[derive(Default)]
pub struct RecordingStatusSink {
    phases: Mutex<Vec<(Target, StorageClusterPhase)>>,
    conditions: Mutex<Vec<(Target, Vec<StorageClusterCondition>)>>,
    cache: Option<Arc<InMemoryCache>>,
    fail: AtomicBool,
}

impl RecordingStatusSink {
    pub fn writing_through(cache: Arc<InMemoryCache>) -> Self {
        Self {
            cache: Some(cache),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn phases(&self) -> Vec<(Target, StorageClusterPhase)> {
        self.phases.lock().clone()
    }

    pub fn last_phase(&self) -> Option<StorageClusterPhase> {
        self.phases.lock().last().map(|(_, p)| *p)
    }

    pub fn last_conditions(&self) -> Option<Vec<StorageClusterCondition>> {
        self.conditions.lock().last().map(|(_, c)| c.clone())
    }

    fn check(&self, target: &Target) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::StatusUpdate {
                target: target.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn set_phase(&self, target: &Target, phase: StorageClusterPhase) -> Result<()> {
        self.check(target)?;
        self.phases.lock().push((target.clone(), phase));
        if let Some(cache) = &self.cache {
            cache.update(target, |c| {
                c.status.get_or_insert_with(StorageClusterStatus::default).phase = Some(phase);
            });
        }
        Ok(())
    }

    async fn set_conditions(&self, target: &Target, conditions: &[StorageClusterCondition]) -> Result<()> {
        self.check(target)?;
        self.conditions
            .lock()
            .push((target.clone(), conditions.to_vec()));
        if let Some(cache) = &self.cache {
            cache.update(target, |c| {
                c.status.get_or_insert_with(StorageClusterStatus::default).conditions =
                    conditions.to_vec();
            });
        }
        Ok(())
    }
}

// =============================================================================
// Event Recorder
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub target: Target,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingRecorder {
    async fn record(&self, target: &Target, severity: EventSeverity, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            target: target.clone(),
            severity,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Platform probe whose answer can change between calls
pub struct StaticPlatformProbe {
    platform: Mutex<Result<Platform>>,
    calls: Mutex<usize>,
}

impl StaticPlatformProbe {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform: Mutex::new(Ok(platform)),
            calls: Mutex::new(0),
        }
    }

    pub fn set(&self, platform: Platform) {
        *self.platform.lock() = Ok(platform);
    }

    pub fn fail(&self) {
        *self.platform.lock() = Err(Error::PlatformDetection("no nodes".into()));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl PlatformProbe for StaticPlatformProbe {
    async fn detect(&self) -> Result<Platform> {
        *self.calls.lock() += 1;
        match &*self.platform.lock() {
            Ok(p) => Ok(*p),
            Err(e) => Err(Error::PlatformDetection(e.to_string())),
        }
    }
}

pub struct StaticVersionProbe(pub Option<ServerVersion>);

impl StaticVersionProbe {
    pub fn ok(git_version: &str) -> Self {
        Self(Some(ServerVersion {
            major: "1".into(),
            minor: "29".into(),
            git_version: git_version.into(),
        }))
    }

    pub fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl VersionProbe for StaticVersionProbe {
    async fn server_version(&self) -> Result<ServerVersion> {
        self.0
            .clone()
            .ok_or_else(|| Error::VersionProbe("discovery unavailable".into()))
    }
}
