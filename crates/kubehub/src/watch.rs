//! Event sources feeding the work queue with instance keys.

use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::{
    api::Api,
    core::DynamicObject,
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, Resource, ResourceExt,
};
use metrics::counter;
use strata_core::{HiveMetastore, InstanceKey, ObjectKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::InstanceStore;

fn instance_key(obj: &HiveMetastore) -> Option<InstanceKey> {
    Some(InstanceKey::new(obj.namespace()?, obj.name_any()))
}

/// Key of the HiveMetastore controlling `obj`, if any.
pub fn owner_instance_key(obj: &DynamicObject) -> Option<InstanceKey> {
    let ns = obj.metadata.namespace.clone()?;
    let kind = HiveMetastore::kind(&());
    let api_version = HiveMetastore::api_version(&());
    obj.owner_references()
        .iter()
        .find(|o| o.controller == Some(true) && o.kind == kind && o.api_version == api_version)
        .map(|o| InstanceKey::new(ns, o.name.clone()))
}

/// Drain a watch stream into `tx`. Stream errors are logged and counted,
/// never fatal: the backoff wrapped around the watcher paces the relist.
/// Returns once the stream ends or the receiver is gone.
async fn forward_events<K, E, S, F>(stream: S, source: &str, to_keys: F, tx: &mpsc::Sender<InstanceKey>)
where
    S: Stream<Item = Result<Event<K>, E>>,
    E: std::fmt::Display,
    F: Fn(Event<K>) -> Vec<InstanceKey>,
{
    futures::pin_mut!(stream);
    while let Some(ev) = stream.next().await {
        match ev {
            Ok(ev) => {
                for k in to_keys(ev) {
                    counter!("watch_events_total", 1u64);
                    if tx.send(k).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                counter!("watch_errors_total", 1u64);
                warn!(source, error = %e, "watch: stream error; retrying");
            }
        }
    }
    warn!(source, "watch: stream ended");
}

fn instance_event_keys(ev: Event<HiveMetastore>) -> Vec<InstanceKey> {
    match ev {
        Event::Applied(o) => instance_key(&o).into_iter().collect(),
        Event::Deleted(o) => {
            debug!(name = %o.name_any(), "watch: instance deleted; owned objects are garbage collected");
            Vec::new()
        }
        Event::Restarted(list) => {
            debug!(count = list.len(), "watch: instances restart");
            list.iter().filter_map(instance_key).collect()
        }
    }
}

fn owned_event_keys(ev: Event<DynamicObject>) -> Vec<InstanceKey> {
    let objs = match ev {
        Event::Applied(o) | Event::Deleted(o) => vec![o],
        Event::Restarted(list) => list,
    };
    objs.iter().filter_map(owner_instance_key).collect()
}

/// List+watch HiveMetastore instances and send their keys on every change.
/// Runs until the receiver is dropped.
pub async fn watch_instances(client: Client, namespace: Option<&str>, tx: mpsc::Sender<InstanceKey>) {
    let api: Api<HiveMetastore> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    info!(ns = ?namespace, "watch: instances started");
    forward_events(stream, "instances", instance_event_keys, &tx).await;
}

/// Watch one managed kind and send the owning instance's key for every change,
/// so external edits and deletions are corrected promptly.
pub async fn watch_owned(client: Client, kind: ObjectKind, namespace: Option<&str>, tx: mpsc::Sender<InstanceKey>) {
    let ar = kind.api_resource();
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };
    let cfg = watcher::Config::default().labels("app.kubernetes.io/managed-by=strata-operator");
    let stream = watcher::watcher(api, cfg).default_backoff();
    info!(kind = %kind, ns = ?namespace, "watch: owned objects started");
    forward_events(stream, kind.short_name(), owned_event_keys, &tx).await;
}

/// Periodically enqueue every instance so drift is corrected even without events.
pub async fn resync_instances<S: InstanceStore + ?Sized>(
    store: &S,
    namespace: Option<&str>,
    every: Duration,
    tx: mpsc::Sender<InstanceKey>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.list_instances(namespace).await {
            Ok(list) => {
                debug!(count = list.len(), "resync: enqueue instances");
                for k in list.iter().filter_map(instance_key) {
                    if tx.send(k).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "resync: list instances failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use strata_core::HiveMetastoreSpec;

    #[test]
    fn owner_key_requires_controller_reference() {
        let ar = ObjectKind::ConfigMap.api_resource();
        let mut obj = DynamicObject::new("hms-metastore-default", &ar).within("data");
        assert!(owner_instance_key(&obj).is_none());
        obj.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "strata.dev/v1alpha1".into(),
            kind: "HiveMetastore".into(),
            name: "hms".into(),
            uid: "u".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        assert_eq!(owner_instance_key(&obj), Some(InstanceKey::new("data", "hms")));
    }

    #[tokio::test]
    async fn resync_sends_every_instance() {
        let store = crate::MemStore::new();
        store.insert_instance(HiveMetastore::new("a", HiveMetastoreSpec::default())).await;
        store.insert_instance(HiveMetastore::new("b", HiveMetastoreSpec::default())).await;
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(async move { resync_instances(&store, None, Duration::from_millis(10), tx).await });
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, InstanceKey::new("default", "a"));
        assert_eq!(second, InstanceKey::new("default", "b"));
        task.abort();
    }

    fn hms(ns: &str, name: &str) -> HiveMetastore {
        let mut o = HiveMetastore::new(name, HiveMetastoreSpec::default());
        o.metadata.namespace = Some(ns.into());
        o
    }

    #[tokio::test]
    async fn stream_errors_do_not_stop_forwarding() {
        let events: Vec<Result<Event<HiveMetastore>, &str>> = vec![
            Err("watch expired"),
            Ok(Event::Applied(hms("data", "a"))),
            Err("connection reset"),
            Ok(Event::Deleted(hms("data", "gone"))),
            Ok(Event::Restarted(vec![hms("data", "b"), hms("other", "c")])),
        ];
        let (tx, mut rx) = mpsc::channel(8);
        forward_events(futures::stream::iter(events), "instances", instance_event_keys, &tx).await;
        drop(tx);
        let mut got = Vec::new();
        while let Some(k) = rx.recv().await {
            got.push(k);
        }
        assert_eq!(got, vec![
            InstanceKey::new("data", "a"),
            InstanceKey::new("data", "b"),
            InstanceKey::new("other", "c"),
        ]);
    }
}
