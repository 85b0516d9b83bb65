use std::fmt;

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service},
    policy::v1::PodDisruptionBudget,
};
use kube::core::ApiResource;
use serde::{Deserialize, Serialize};

/// Kinds of managed objects, in default reconcile order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
    PersistentVolumeClaim,
    Deployment,
    Service,
    PodDisruptionBudget,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Secret,
        ObjectKind::ConfigMap,
        ObjectKind::PersistentVolumeClaim,
        ObjectKind::Deployment,
        ObjectKind::Service,
        ObjectKind::PodDisruptionBudget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "Secret",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::Service => "Service",
            ObjectKind::PodDisruptionBudget => "PodDisruptionBudget",
        }
    }

    /// Short name used in condition types and status messages.
    pub fn short_name(&self) -> &'static str {
        match self {
            ObjectKind::PersistentVolumeClaim => "PVC",
            ObjectKind::PodDisruptionBudget => "PDB",
            other => other.as_str(),
        }
    }

    /// Condition type recorded after the kind's task succeeds, e.g. `ReconcileSecret`.
    pub fn condition_type(&self) -> String {
        format!("Reconcile{}", self.short_name())
    }

    pub fn api_resource(&self) -> ApiResource {
        match self {
            ObjectKind::Secret => ApiResource::erase::<Secret>(&()),
            ObjectKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ObjectKind::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
            ObjectKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ObjectKind::Service => ApiResource::erase::<Service>(&()),
            ObjectKind::PodDisruptionBudget => ApiResource::erase::<PodDisruptionBudget>(&()),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
