//! Cross-Resource Request Mapping
//!
//! Turns a significant event on any watched kind into the set of
//! StorageClusters that must be re-evaluated because of it.
//!
//! Mapping prefers false positives: when the changed object does not name a
//! StorageCluster owner, every StorageCluster in its namespace is enqueued.
//! A redundant convergence run is a cheap no-op; a missed one leaves drift
//! in place until the next resync.

use crate::controller::events::{ChangeEvent, ResourceKind};
use crate::domain::{ConvergenceRequest, Target, TargetCache};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::trace;

/// How events on one watched kind map to targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMapper {
    /// The object is itself a StorageCluster
    Primary,
    /// Controller owner of kind StorageCluster, namespace fan-out otherwise
    Owner,
    /// Every StorageCluster in the object's namespace; every StorageCluster
    /// in the cluster for cluster-scoped objects
    Namespace,
}

impl RequestMapper {
    /// Resolve the requests for one event.
    ///
    /// Lookups go to the local cache, bounded by `lookup_timeout`. A failed
    /// or timed-out lookup is returned as an error; callers log it and treat
    /// the event as mapping to nothing, leaving recovery to the next event
    /// or the periodic resync.
    pub async fn map(
        &self,
        event: &ChangeEvent,
        cache: &dyn TargetCache,
        lookup_timeout: Duration,
    ) -> Result<Vec<ConvergenceRequest>> {
        let object = event.object();

        let targets: BTreeSet<Target> = match self {
            RequestMapper::Primary => {
                let namespace = object.namespace.clone().ok_or_else(|| {
                    Error::Internal(format!("StorageCluster {} has no namespace", object.name))
                })?;
                BTreeSet::from([Target::new(namespace, object.name.clone())])
            }
            RequestMapper::Owner => {
                let owner = object
                    .namespace
                    .as_deref()
                    .zip(object.controller_of_kind(ResourceKind::StorageCluster.as_str()));
                match owner {
                    Some((ns, o)) => BTreeSet::from([Target::new(ns, o.name.clone())]),
                    None => fan_out(object.namespace.as_deref(), cache, lookup_timeout).await?,
                }
            }
            RequestMapper::Namespace => {
                fan_out(object.namespace.as_deref(), cache, lookup_timeout).await?
            }
        };

        trace!(
            kind = %object.kind,
            name = %object.name,
            targets = targets.len(),
            "Mapped event to targets"
        );

        Ok(targets.into_iter().map(ConvergenceRequest::new).collect())
    }
}

/// Every cached StorageCluster in `namespace` (all of them for `None`),
/// bounded by `lookup_timeout`
pub(crate) async fn fan_out(
    namespace: Option<&str>,
    cache: &dyn TargetCache,
    lookup_timeout: Duration,
) -> Result<BTreeSet<Target>> {
    let targets = tokio::time::timeout(lookup_timeout, cache.list_targets(namespace))
        .await
        .map_err(|_| Error::LookupTimeout {
            kind: ResourceKind::StorageCluster.to_string(),
            timeout: lookup_timeout,
        })??;
    Ok(targets.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::events::{OwnerLink, WatchedObject};
    use crate::controller::testing::InMemoryCache;
    use assert_matches::assert_matches;

    const NS: &str = "openshift-storage";
    const TIMEOUT: Duration = Duration::from_millis(200);

    fn targets(requests: Vec<ConvergenceRequest>) -> Vec<Target> {
        requests.into_iter().map(|r| r.target).collect()
    }

    #[tokio::test]
    async fn test_primary_is_identity() {
        let cache = InMemoryCache::new();
        let obj = WatchedObject::new(ResourceKind::StorageCluster, Some(NS), "ocs");
        let got = RequestMapper::Primary
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(targets(got), vec![Target::new(NS, "ocs")]);
    }

    #[tokio::test]
    async fn test_owner_reference_wins() {
        let cache = InMemoryCache::with_targets(&[(NS, "a"), (NS, "b")]);
        let obj = WatchedObject::new(ResourceKind::CephCluster, Some(NS), "a-cephcluster")
            .with_owner("StorageCluster", "a");
        let got = RequestMapper::Owner
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(targets(got), vec![Target::new(NS, "a")]);
    }

    #[tokio::test]
    async fn test_unowned_falls_back_to_namespace() {
        let cache = InMemoryCache::with_targets(&[(NS, "a"), (NS, "b"), ("other", "c")]);
        let obj = WatchedObject::new(ResourceKind::ConfigMap, Some(NS), "stray")
            .with_owner("Deployment", "x");
        let got = RequestMapper::Owner
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(targets(got), vec![Target::new(NS, "a"), Target::new(NS, "b")]);
    }

    #[tokio::test]
    async fn test_non_controller_owner_is_ignored() {
        let cache = InMemoryCache::with_targets(&[(NS, "a"), (NS, "b")]);
        let mut obj = WatchedObject::new(ResourceKind::Service, Some(NS), "shared-svc");
        obj.owners.push(OwnerLink {
            kind: "StorageCluster".into(),
            name: "a".into(),
            controller: false,
        });
        let got = RequestMapper::Owner
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(targets(got), vec![Target::new(NS, "a"), Target::new(NS, "b")]);
    }

    #[tokio::test]
    async fn test_cluster_scoped_fans_out_everywhere() {
        let cache = InMemoryCache::with_targets(&[(NS, "a"), ("other", "c")]);
        let obj = WatchedObject::new(
            ResourceKind::CustomResourceDefinition,
            None,
            "virtualmachines.kubevirt.io",
        );
        let got = RequestMapper::Namespace
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn test_list_failure_is_surfaced() {
        let cache = InMemoryCache::with_targets(&[(NS, "a")]);
        cache.fail_lists(true);
        let obj = WatchedObject::new(ResourceKind::StorageProfile, Some(NS), "ssd");
        let got = RequestMapper::Namespace
            .map(&ChangeEvent::Created(obj), &cache, TIMEOUT)
            .await;
        assert_matches!(got, Err(Error::ListFailed { .. }));
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let cache = InMemoryCache::with_targets(&[(NS, "a")]);
        cache.set_list_delay(Duration::from_secs(5));
        let obj = WatchedObject::new(ResourceKind::StorageProfile, Some(NS), "ssd");
        let got = RequestMapper::Namespace
            .map(&ChangeEvent::Created(obj), &cache, Duration::from_millis(20))
            .await;
        assert_matches!(got, Err(Error::LookupTimeout { .. }));
    }
}
