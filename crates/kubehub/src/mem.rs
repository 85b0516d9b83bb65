//! In-memory object and instance store.
//!
//! Behaves like the API server where the engine can observe it: resource
//! versions are checked on update, status survives spec replaces, and
//! Services get a cluster IP (plus node ports when exposed) on create.
//! Call counters and failure injection make it the test double of choice.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;
use serde_json::Value as Json;
use strata_core::{HiveMetastore, HiveMetastoreSpec, InstanceKey, ObjectKind, StoreError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{object_name, InstanceStore, ObjectStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub lists: usize,
    pub status_writes: usize,
}

impl CallCounts {
    pub fn object_writes(&self) -> usize { self.creates + self.updates }
}

type ObjKey = (ObjectKind, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjKey, DynamicObject>,
    instances: BTreeMap<InstanceKey, HiveMetastore>,
    rv: u64,
    next_ip: u32,
    next_node_port: i64,
    calls: CallCounts,
    write_failures: BTreeMap<ObjectKind, StoreError>,
    status_conflicts: u32,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.rv += 1;
        self.rv.to_string()
    }

    fn allocate_service_fields(&mut self, obj: &mut DynamicObject) {
        let Some(spec) = obj.data.get_mut("spec").and_then(Json::as_object_mut) else { return };
        if !spec.contains_key("clusterIP") {
            self.next_ip += 1;
            let ip = format!("10.96.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1);
            spec.insert("clusterIP".into(), Json::String(ip.clone()));
            spec.insert("clusterIPs".into(), Json::Array(vec![Json::String(ip)]));
        }
        let exposed = matches!(spec.get("type").and_then(Json::as_str), Some("NodePort" | "LoadBalancer"));
        if !exposed {
            return;
        }
        if let Some(ports) = spec.get_mut("ports").and_then(Json::as_array_mut) {
            for port in ports.iter_mut().filter_map(Json::as_object_mut) {
                if !port.contains_key("nodePort") {
                    self.next_node_port += 1;
                    port.insert("nodePort".into(), Json::from(30000 + self.next_node_port));
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<State>>,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    /// Store an instance as if a user created it: uid, generation 1, fresh resourceVersion.
    pub async fn insert_instance(&self, mut instance: HiveMetastore) -> HiveMetastore {
        let mut st = self.state.lock().await;
        let meta = &mut instance.metadata;
        meta.uid.get_or_insert_with(|| Uuid::new_v4().to_string());
        meta.generation.get_or_insert(1);
        meta.namespace.get_or_insert_with(|| "default".to_string());
        meta.resource_version = Some(st.next_rv());
        let key = InstanceKey::new(meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default());
        st.instances.insert(key, instance.clone());
        instance
    }

    /// Edit an instance's spec, bumping its generation like the API server does.
    pub async fn edit_spec(&self, key: &InstanceKey, edit: impl FnOnce(&mut HiveMetastoreSpec)) -> Option<HiveMetastore> {
        let mut st = self.state.lock().await;
        let rv = st.next_rv();
        let inst = st.instances.get_mut(key)?;
        edit(&mut inst.spec);
        inst.metadata.generation = Some(inst.metadata.generation.unwrap_or(0) + 1);
        inst.metadata.resource_version = Some(rv);
        Some(inst.clone())
    }

    pub async fn instance(&self, key: &InstanceKey) -> Option<HiveMetastore> {
        self.state.lock().await.instances.get(key).cloned()
    }

    pub async fn object(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        let st = self.state.lock().await;
        st.objects.get(&(kind, namespace.to_string(), name.to_string())).cloned()
    }

    pub async fn objects(&self, kind: ObjectKind) -> Vec<DynamicObject> {
        let st = self.state.lock().await;
        st.objects.iter().filter(|((k, _, _), _)| *k == kind).map(|(_, o)| o.clone()).collect()
    }

    /// Overwrite the server-owned `status` of a stored object.
    pub async fn set_object_status(&self, kind: ObjectKind, namespace: &str, name: &str, status: Json) -> bool {
        let mut st = self.state.lock().await;
        match st.objects.get_mut(&(kind, namespace.to_string(), name.to_string())) {
            Some(obj) => {
                if let Some(map) = obj.data.as_object_mut() {
                    map.insert("status".into(), status);
                }
                true
            }
            None => false,
        }
    }

    pub async fn calls(&self) -> CallCounts { self.state.lock().await.calls }

    pub async fn reset_calls(&self) { self.state.lock().await.calls = CallCounts::default(); }

    /// Fail every create/update of `kind` with `err` until cleared with `None`.
    pub async fn fail_writes(&self, kind: ObjectKind, err: Option<StoreError>) {
        let mut st = self.state.lock().await;
        match err {
            Some(e) => { st.write_failures.insert(kind, e); }
            None => { st.write_failures.remove(&kind); }
        }
    }

    /// Reject the next `n` status writes with a conflict.
    pub async fn inject_status_conflicts(&self, n: u32) {
        self.state.lock().await.status_conflicts = n;
    }
}

fn key_of(kind: ObjectKind, obj: &DynamicObject) -> Result<ObjKey, StoreError> {
    let (ns, name) = object_name(obj)?;
    Ok((kind, ns.to_string(), name.to_string()))
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.as_ref();
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|have| have == v),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError> {
        let mut st = self.state.lock().await;
        st.calls.gets += 1;
        Ok(st.objects.get(&(kind, namespace.to_string(), name.to_string())).cloned())
    }

    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let mut st = self.state.lock().await;
        st.calls.creates += 1;
        if let Some(e) = st.write_failures.get(&kind) {
            return Err(e.clone());
        }
        let key = key_of(kind, obj)?;
        if st.objects.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{} {}/{} already exists", kind, key.1, key.2)));
        }
        let mut stored = obj.clone();
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(st.next_rv());
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.metadata.generation = Some(1);
        if kind == ObjectKind::Service {
            st.allocate_service_fields(&mut stored);
        }
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let mut st = self.state.lock().await;
        st.calls.updates += 1;
        if let Some(e) = st.write_failures.get(&kind) {
            return Err(e.clone());
        }
        let key = key_of(kind, obj)?;
        let Some(existing) = st.objects.get(&key) else {
            return Err(StoreError::NotFound(format!("{} {}/{}", kind, key.1, key.2)));
        };
        if existing.metadata.resource_version != obj.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "{} {}/{}: resourceVersion {:?} is stale",
                kind, key.1, key.2, obj.metadata.resource_version
            )));
        }
        let mut stored = obj.clone();
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
        let generation = existing.metadata.generation.unwrap_or(1);
        let spec_changed = existing.data.get("spec") != stored.data.get("spec");
        stored.metadata.generation = Some(if spec_changed { generation + 1 } else { generation });
        let status = existing.data.get("status").cloned();
        if let (Some(status), Some(map)) = (status, stored.data.as_object_mut()) {
            map.insert("status".into(), status);
        }
        stored.metadata.resource_version = Some(st.next_rv());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list(&self, kind: ObjectKind, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, StoreError> {
        let mut st = self.state.lock().await;
        st.calls.lists += 1;
        Ok(st
            .objects
            .iter()
            .filter(|((k, ns, _), o)| *k == kind && ns == namespace && matches_selector(o, label_selector))
            .map(|(_, o)| o.clone())
            .collect())
    }
}

#[async_trait]
impl InstanceStore for MemStore {
    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<HiveMetastore>, StoreError> {
        Ok(self.state.lock().await.instances.get(key).cloned())
    }

    async fn list_instances(&self, namespace: Option<&str>) -> Result<Vec<HiveMetastore>, StoreError> {
        let st = self.state.lock().await;
        Ok(st
            .instances
            .iter()
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn replace_status(&self, instance: &HiveMetastore) -> Result<HiveMetastore, StoreError> {
        let mut st = self.state.lock().await;
        st.calls.status_writes += 1;
        let key = InstanceKey::new(
            instance.metadata.namespace.clone().unwrap_or_default(),
            instance.metadata.name.clone().unwrap_or_default(),
        );
        if st.status_conflicts > 0 {
            st.status_conflicts -= 1;
            return Err(StoreError::Conflict(format!("{}: injected status conflict", key)));
        }
        let rv = st.next_rv();
        let Some(existing) = st.instances.get_mut(&key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if existing.metadata.resource_version != instance.metadata.resource_version {
            return Err(StoreError::Conflict(format!("{}: resourceVersion is stale", key)));
        }
        existing.status = instance.status.clone();
        existing.metadata.resource_version = Some(rv);
        Ok(existing.clone())
    }
}
