use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::layer::ConfigLayer;

pub const DEFAULT_IMAGE: &str = "apache/hive";
pub const DEFAULT_TAG: &str = "4.0.0";

/// Desired topology of one metastore deployment.
///
/// The API server bumps `metadata.generation` on every spec edit; the engine
/// compares it against the `Progressing` condition to detect stale status.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(
    group = "strata.dev",
    version = "v1alpha1",
    kind = "HiveMetastore",
    namespaced,
    status = "HiveMetastoreStatus",
    shortname = "hms",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HiveMetastoreSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_config: Option<ConfigLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_config: Option<ConfigLayer>,
    #[serde(default)]
    pub role_groups: BTreeMap<String, RoleGroupSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_operation: Option<ClusterOperation>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Full image reference; wins over repository/tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

impl ImageSpec {
    pub fn reference(&self) -> String {
        if let Some(custom) = &self.custom {
            return custom.clone();
        }
        format!(
            "{}:{}",
            self.repository.as_deref().unwrap_or(DEFAULT_IMAGE),
            self.tag.as_deref().unwrap_or(DEFAULT_TAG)
        )
    }

    pub fn pull_policy(&self) -> &str {
        self.pull_policy.as_deref().unwrap_or("IfNotPresent")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ConfigLayer>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperation {
    /// Skip reconcile passes entirely while set.
    #[serde(default)]
    pub reconciliation_paused: bool,
    /// Scale every workload to zero.
    #[serde(default)]
    pub stopped: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HiveMetastoreStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HiveMetastore {
    pub fn conditions(&self) -> &[Condition] {
        self.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    pub fn image(&self) -> ImageSpec {
        self.spec.image.clone().unwrap_or_default()
    }

    pub fn is_paused(&self) -> bool {
        self.spec.cluster_operation.as_ref().is_some_and(|op| op.reconciliation_paused)
    }

    pub fn is_stopped(&self) -> bool {
        self.spec.cluster_operation.as_ref().is_some_and(|op| op.stopped)
    }
}
