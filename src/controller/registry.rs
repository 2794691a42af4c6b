//! Watch Registrations
//!
//! A flat table of `{kind, predicate, mapper}` records, one per watched
//! kind. The dispatcher looks events up here by kind and treats every
//! registration the same way.

use crate::controller::events::{ChangeEvent, ResourceKind};
use crate::controller::mapper::RequestMapper;
use crate::controller::predicates::{
    compose, confirmed_deletion, field_changed, generation_changed, metadata_changed, named,
    Predicate,
};
use crate::crd::CONSUMER_OPERATOR_VERSION_PATH;
use std::collections::BTreeMap;

/// Secret holding the public key used to verify onboarding tickets
pub const ONBOARDING_TICKET_KEY_SECRET: &str = "onboarding-ticket-key";

/// CRD whose appearance switches on virtualization-specific settings
pub const KUBEVIRT_VM_CRD: &str = "virtualmachines.kubevirt.io";

// =============================================================================
// Registration
// =============================================================================

/// How one watched kind feeds the convergence queue
#[derive(Debug, Clone)]
pub struct WatchRegistration {
    pub kind: ResourceKind,
    pub predicate: Predicate,
    pub mapper: RequestMapper,
}

impl WatchRegistration {
    pub fn new(kind: ResourceKind, predicate: Predicate, mapper: RequestMapper) -> Self {
        Self {
            kind,
            predicate,
            mapper,
        }
    }

    /// Whether the event passes this registration's predicate
    pub fn admits(&self, event: &ChangeEvent) -> bool {
        self.predicate.evaluate(event)
    }
}

/// Options affecting which kinds are watched
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Leave NooBaa out of the table (the CRD may not be installed)
    pub skip_noobaa: bool,
}

// =============================================================================
// Table
// =============================================================================

/// All registrations, keyed by kind
#[derive(Debug, Clone, Default)]
pub struct WatchTable {
    entries: BTreeMap<ResourceKind, WatchRegistration>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration, replacing any previous one for the same kind
    pub fn register(&mut self, registration: WatchRegistration) -> &mut Self {
        self.entries.insert(registration.kind, registration);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&WatchRegistration> {
        self.entries.get(&kind)
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The production table for StorageCluster convergence
pub fn storage_cluster_watches(options: &WatchOptions) -> WatchTable {
    use ResourceKind::*;

    let mut table = WatchTable::new();
    table
        .register(WatchRegistration::new(
            StorageCluster,
            compose(vec![generation_changed(), metadata_changed()]),
            RequestMapper::Primary,
        ))
        .register(WatchRegistration::new(
            CephCluster,
            Predicate::always(),
            RequestMapper::Owner,
        ))
        .register(WatchRegistration::new(
            PersistentVolumeClaim,
            confirmed_deletion(),
            RequestMapper::Owner,
        ))
        .register(WatchRegistration::new(
            Deployment,
            generation_changed(),
            RequestMapper::Owner,
        ))
        .register(WatchRegistration::new(
            Service,
            generation_changed(),
            RequestMapper::Owner,
        ))
        .register(WatchRegistration::new(
            ConfigMap,
            generation_changed(),
            RequestMapper::Owner,
        ))
        .register(WatchRegistration::new(
            StorageProfile,
            Predicate::always(),
            RequestMapper::Namespace,
        ))
        .register(WatchRegistration::new(
            CustomResourceDefinition,
            named(KUBEVIRT_VM_CRD),
            RequestMapper::Namespace,
        ))
        .register(WatchRegistration::new(
            Secret,
            named(ONBOARDING_TICKET_KEY_SECRET),
            RequestMapper::Namespace,
        ))
        .register(WatchRegistration::new(
            StorageConsumer,
            field_changed(CONSUMER_OPERATOR_VERSION_PATH),
            RequestMapper::Namespace,
        ));

    if !options.skip_noobaa {
        table.register(WatchRegistration::new(
            NooBaa,
            Predicate::always(),
            RequestMapper::Owner,
        ));
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::events::WatchedObject;
    use serde_json::json;

    const NS: &str = "openshift-storage";

    #[test]
    fn test_production_table_kinds() {
        let table = storage_cluster_watches(&WatchOptions::default());
        assert_eq!(table.len(), 11);
        assert!(table.contains(ResourceKind::NooBaa));
        assert_eq!(
            table.get(ResourceKind::StorageCluster).unwrap().mapper,
            RequestMapper::Primary
        );
    }

    #[test]
    fn test_skip_noobaa() {
        let table = storage_cluster_watches(&WatchOptions { skip_noobaa: true });
        assert!(!table.contains(ResourceKind::NooBaa));
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn test_primary_ignores_status_only_update() {
        let table = storage_cluster_watches(&WatchOptions::default());
        let reg = table.get(ResourceKind::StorageCluster).unwrap();

        let old = WatchedObject::new(ResourceKind::StorageCluster, Some(NS), "ocs")
            .with_generation(4)
            .with_body(json!({"status": {"phase": "Progressing"}}));
        let new = WatchedObject::new(ResourceKind::StorageCluster, Some(NS), "ocs")
            .with_generation(4)
            .with_body(json!({"status": {"phase": "Ready"}}));

        assert!(!reg.admits(&ChangeEvent::Updated { old, new }));
    }

    #[test]
    fn test_secret_registration_is_identity_filtered() {
        let table = storage_cluster_watches(&WatchOptions::default());
        let reg = table.get(ResourceKind::Secret).unwrap();

        let wrong = WatchedObject::new(ResourceKind::Secret, Some(NS), "wrong-name");
        let right = WatchedObject::new(ResourceKind::Secret, Some(NS), ONBOARDING_TICKET_KEY_SECRET);
        assert!(!reg.admits(&ChangeEvent::Created(wrong)));
        assert!(reg.admits(&ChangeEvent::Created(right)));
    }

    #[test]
    fn test_pvc_registration_drops_unconfirmed_deletes() {
        let table = storage_cluster_watches(&WatchOptions::default());
        let reg = table.get(ResourceKind::PersistentVolumeClaim).unwrap();
        let pvc = WatchedObject::new(ResourceKind::PersistentVolumeClaim, Some(NS), "db-noobaa-db-0");

        assert!(!reg.admits(&ChangeEvent::Deleted {
            object: pvc.clone(),
            confirmed: false
        }));
        assert!(reg.admits(&ChangeEvent::Deleted {
            object: pvc,
            confirmed: true
        }));
    }
}
