//! Watch adapter
//!
//! Turns a kube `watcher` stream into [`ChangeEvent`]s for the dispatcher.
//!
//! The watcher reports the current object on every apply and a full list
//! on every (re)start. The adapter keeps the last object it saw per key so
//! it can pair old and new on updates. An object that disappears between
//! two lists was deleted while the watch was down; nobody saw the final
//! state, so it is reported as an unconfirmed deletion.

use crate::controller::dispatcher::{EventSender, SendOutcome};
use crate::controller::events::{ChangeEvent, ResourceKind, WatchedObject};
use futures::{Stream, StreamExt};
use kube::runtime::watcher;
use kube::Resource;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ObjectKey = (Option<String>, String);

fn key_of(obj: &WatchedObject) -> ObjectKey {
    (obj.namespace.clone(), obj.name.clone())
}

/// Last-seen state of one watched kind
#[derive(Debug)]
pub struct WatchState {
    kind: ResourceKind,
    known: HashMap<ObjectKey, WatchedObject>,
}

impl WatchState {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            known: HashMap::new(),
        }
    }

    fn applied(&mut self, object: WatchedObject) -> ChangeEvent {
        match self.known.insert(key_of(&object), object.clone()) {
            Some(old) => ChangeEvent::Updated { old, new: object },
            None => ChangeEvent::Created(object),
        }
    }

    /// Translate one watcher event
    pub fn observe<K>(&mut self, event: watcher::Event<K>) -> Vec<ChangeEvent>
    where
        K: Resource + Serialize,
    {
        match event {
            watcher::Event::Applied(obj) => {
                vec![self.applied(WatchedObject::from_resource(self.kind, &obj))]
            }
            watcher::Event::Deleted(obj) => {
                let object = WatchedObject::from_resource(self.kind, &obj);
                self.known.remove(&key_of(&object));
                vec![ChangeEvent::Deleted {
                    object,
                    confirmed: true,
                }]
            }
            watcher::Event::Restarted(objs) => {
                let mut events = Vec::with_capacity(objs.len());
                let mut listed = HashSet::with_capacity(objs.len());
                for obj in &objs {
                    let object = WatchedObject::from_resource(self.kind, obj);
                    listed.insert(key_of(&object));
                    events.push(self.applied(object));
                }

                let vanished: Vec<ObjectKey> = self
                    .known
                    .keys()
                    .filter(|k| !listed.contains(*k))
                    .cloned()
                    .collect();
                for key in vanished {
                    if let Some(object) = self.known.remove(&key) {
                        events.push(ChangeEvent::Deleted {
                            object,
                            confirmed: false,
                        });
                    }
                }
                events
            }
        }
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Forward a watch stream into the dispatcher until shutdown or until the
/// stream ends. Watch errors are logged; the stream is expected to retry
/// on its own (`default_backoff`).
pub async fn pump_events<K, S, E>(
    kind: ResourceKind,
    stream: S,
    sender: EventSender,
    shutdown: CancellationToken,
) where
    K: Resource + Serialize,
    S: Stream<Item = Result<watcher::Event<K>, E>>,
    E: std::fmt::Display,
{
    let mut state = WatchState::new(kind);
    futures::pin_mut!(stream);
    info!(kind = %kind, "Watch started");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                for change in state.observe(event) {
                    if let SendOutcome::Closed = sender.send(change) {
                        debug!(kind = %kind, "Dispatcher closed, stopping watch");
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(kind = %kind, error = %e, "Watch error");
            }
            None => {
                warn!(kind = %kind, "Watch stream ended");
                break;
            }
        }
    }
    debug!(kind = %kind, "Watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::dispatcher::event_channel;
    use crate::metrics::PipelineMetrics;
    use assert_matches::assert_matches;
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    use kube::api::ObjectMeta;

    fn pvc(name: &str, generation: i64) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("openshift-storage".to_string()),
                generation: Some(generation),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        }
    }

    #[test]
    fn test_applied_pairs_old_and_new() {
        let mut state = WatchState::new(ResourceKind::PersistentVolumeClaim);

        let first = state.observe(watcher::Event::Applied(pvc("db", 1)));
        assert_matches!(first.as_slice(), [ChangeEvent::Created(_)]);

        let second = state.observe(watcher::Event::Applied(pvc("db", 2)));
        assert_matches!(
            second.as_slice(),
            [ChangeEvent::Updated { old, new }] if old.generation == Some(1) && new.generation == Some(2)
        );
    }

    #[test]
    fn test_watched_delete_is_confirmed() {
        let mut state = WatchState::new(ResourceKind::PersistentVolumeClaim);
        state.observe(watcher::Event::Applied(pvc("db", 1)));

        let events = state.observe(watcher::Event::Deleted(pvc("db", 1)));
        assert_matches!(events.as_slice(), [ChangeEvent::Deleted { confirmed: true, .. }]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_vanished_on_relist_is_unconfirmed() {
        let mut state = WatchState::new(ResourceKind::PersistentVolumeClaim);
        state.observe(watcher::Event::Restarted(vec![pvc("a", 1), pvc("b", 1)]));
        assert_eq!(state.len(), 2);

        let events = state.observe(watcher::Event::Restarted(vec![pvc("a", 1)]));
        assert_eq!(events.len(), 2);
        assert_matches!(&events[0], ChangeEvent::Updated { .. });
        assert_matches!(
            &events[1],
            ChangeEvent::Deleted { object, confirmed: false } if object.name == "b"
        );
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_pump_forwards_until_stream_ends() {
        let shutdown = CancellationToken::new();
        let (sender, mut receiver) = event_channel(16, shutdown.clone(), PipelineMetrics::new().unwrap());
        let events: Vec<Result<watcher::Event<PersistentVolumeClaim>, String>> = vec![
            Ok(watcher::Event::Applied(pvc("db", 1))),
            Err("connection reset".to_string()),
            Ok(watcher::Event::Deleted(pvc("db", 1))),
        ];

        pump_events(
            ResourceKind::PersistentVolumeClaim,
            futures::stream::iter(events),
            sender,
            shutdown,
        )
        .await;

        assert_matches!(receiver.recv().await, Some(ChangeEvent::Created(_)));
        assert_matches!(
            receiver.recv().await,
            Some(ChangeEvent::Deleted { confirmed: true, .. })
        );
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (sender, _receiver) = event_channel(16, shutdown.clone(), PipelineMetrics::new().unwrap());
        shutdown.cancel();

        let pending = futures::stream::pending::<Result<watcher::Event<PersistentVolumeClaim>, String>>();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            pump_events(ResourceKind::PersistentVolumeClaim, pending, sender, shutdown),
        )
        .await
        .unwrap();
    }
}
