//! Server-assigned fields copied from the live object before diffing, so an
//! update never tries to clear what only the API server can allocate.

use std::sync::Arc;

use kube::core::DynamicObject;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value as Json};
use strata_core::ObjectKind;

const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";

pub trait FieldPreserver: Send + Sync {
    fn preserve(&self, current: &DynamicObject, desired: &mut DynamicObject);
}

fn spec_pair<'a>(current: &'a DynamicObject, desired: &'a mut DynamicObject) -> Option<(&'a Map<String, Json>, &'a mut Map<String, Json>)> {
    let cur = current.data.get("spec")?.as_object()?;
    let want = desired.data.get_mut("spec")?.as_object_mut()?;
    Some((cur, want))
}

fn copy_if_unset(cur: &Map<String, Json>, want: &mut Map<String, Json>, field: &str) {
    if want.contains_key(field) {
        return;
    }
    if let Some(v) = cur.get(field) {
        want.insert(field.to_string(), v.clone());
    }
}

/// Nothing to keep.
pub struct Passthrough;

impl FieldPreserver for Passthrough {
    fn preserve(&self, _current: &DynamicObject, _desired: &mut DynamicObject) {}
}

/// Cluster IPs, health check port and, for exposed services, node ports.
pub struct ServicePreserver;

impl FieldPreserver for ServicePreserver {
    fn preserve(&self, current: &DynamicObject, desired: &mut DynamicObject) {
        let Some((cur, want)) = spec_pair(current, desired) else { return };
        for field in ["clusterIP", "clusterIPs", "healthCheckNodePort"] {
            copy_if_unset(cur, want, field);
        }
        let exposed = matches!(want.get("type").and_then(Json::as_str), Some("NodePort" | "LoadBalancer"));
        if !exposed {
            return;
        }
        let live_ports = cur.get("ports").and_then(Json::as_array).map(Vec::as_slice).unwrap_or(&[]);
        let Some(ports) = want.get_mut("ports").and_then(Json::as_array_mut) else { return };
        for (idx, port) in ports.iter_mut().enumerate() {
            let Some(port) = port.as_object_mut() else { continue };
            if port.contains_key("nodePort") {
                continue;
            }
            let name = port.get("name").and_then(Json::as_str).map(str::to_string);
            let matched = match name {
                Some(n) => live_ports.iter().find(|p| p.get("name").and_then(Json::as_str) == Some(n.as_str())),
                None => live_ports.get(idx),
            };
            if let Some(node_port) = matched.and_then(|p| p.get("nodePort")) {
                port.insert("nodePort".into(), node_port.clone());
            }
        }
    }
}

/// Bound volume and a defaulted storage class.
pub struct PvcPreserver;

impl FieldPreserver for PvcPreserver {
    fn preserve(&self, current: &DynamicObject, desired: &mut DynamicObject) {
        let Some((cur, want)) = spec_pair(current, desired) else { return };
        copy_if_unset(cur, want, "volumeName");
        copy_if_unset(cur, want, "storageClassName");
    }
}

/// The rollout-restart stamp on the pod template.
pub struct DeploymentPreserver;

impl FieldPreserver for DeploymentPreserver {
    fn preserve(&self, current: &DynamicObject, desired: &mut DynamicObject) {
        let Some(stamp) = current.data.pointer("/spec/template/metadata/annotations").and_then(|a| a.get(RESTARTED_AT)).cloned() else {
            return;
        };
        let Some(meta) = desired.data.pointer_mut("/spec/template/metadata").and_then(Json::as_object_mut) else { return };
        let annos = meta.entry("annotations").or_insert_with(|| Json::Object(Map::new()));
        if let Some(annos) = annos.as_object_mut() {
            annos.entry(RESTARTED_AT).or_insert(stamp);
        }
    }
}

/// Field preservers by object kind. Unknown kinds fall back to [`Passthrough`].
#[derive(Clone, Default)]
pub struct KindRegistry {
    preservers: FxHashMap<ObjectKind, Arc<dyn FieldPreserver>>,
}

impl KindRegistry {
    pub fn new() -> Self { Self::default() }

    /// Preservers for every kind the engine manages.
    pub fn standard() -> Self {
        Self::new()
            .register(ObjectKind::Service, ServicePreserver)
            .register(ObjectKind::PersistentVolumeClaim, PvcPreserver)
            .register(ObjectKind::Deployment, DeploymentPreserver)
            .register(ObjectKind::ConfigMap, Passthrough)
            .register(ObjectKind::Secret, Passthrough)
            .register(ObjectKind::PodDisruptionBudget, Passthrough)
    }

    pub fn register(mut self, kind: ObjectKind, preserver: impl FieldPreserver + 'static) -> Self {
        self.preservers.insert(kind, Arc::new(preserver));
        self
    }

    pub fn preserver(&self, kind: ObjectKind) -> &dyn FieldPreserver {
        match self.preservers.get(&kind) {
            Some(p) => p.as_ref(),
            None => &Passthrough,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = ObjectKind> + '_ {
        self.preservers.keys().copied()
    }
}
