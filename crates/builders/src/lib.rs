//! Strata builders: desired bodies for every managed kind, assembled from a
//! role group's resolved configuration. Pure functions, no I/O.

#![forbid(unsafe_code)]

mod config_map;
mod deployment;
mod kerberos;
mod pdb;
mod pvc;
mod secret;
mod service;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use strata_core::names::{role_group_labels, role_group_resource_name, selector_labels};
use strata_core::{BuildError, HiveMetastore, ObjectKind};
use strata_resolve::ResolvedConfig;

pub use config_map::{
    config_files, render_hive_site, render_log4j2, render_xml_properties, ConfigMapBuilder, HIVE_SITE, LOG4J2_PROPERTIES,
};
pub use deployment::{DeploymentBuilder, CONTAINER_NAME, THRIFT_PORT, THRIFT_PORT_NAME};
pub use kerberos::{CORE_SITE, KERBEROS_DIR};
pub use pdb::PdbBuilder;
pub use pvc::{PvcBuilder, DEFAULT_CAPACITY};
pub use secret::{service_opts, SecretBuilder};
pub use service::ServiceBuilder;

/// Everything a builder may read for one role group.
pub struct BuildContext<'a> {
    pub instance: &'a HiveMetastore,
    pub role_group: &'a str,
    pub config: &'a ResolvedConfig,
}

impl<'a> BuildContext<'a> {
    pub fn new(instance: &'a HiveMetastore, role_group: &'a str, config: &'a ResolvedConfig) -> Self {
        Self { instance, role_group, config }
    }

    /// Name shared by all objects of this role group.
    pub fn name(&self) -> String {
        role_group_resource_name(&self.instance.name_any(), self.role_group)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        role_group_labels(&self.instance.name_any(), self.role_group)
    }

    pub fn selector(&self) -> BTreeMap<String, String> {
        selector_labels(&self.instance.name_any(), self.role_group)
    }

    pub fn owner_reference(&self) -> Result<OwnerReference, BuildError> {
        self.instance
            .controller_owner_ref(&())
            .ok_or_else(|| BuildError::OwnerReference(format!("instance {} has no uid", self.instance.name_any())))
    }

    /// Name, namespace, labels and controller reference.
    pub fn metadata(&self) -> Result<ObjectMeta, BuildError> {
        let namespace = self
            .instance
            .namespace()
            .ok_or_else(|| BuildError::OwnerReference(format!("instance {} has no namespace", self.instance.name_any())))?;
        Ok(ObjectMeta {
            name: Some(self.name()),
            namespace: Some(namespace),
            labels: Some(self.labels()),
            owner_references: Some(vec![self.owner_reference()?]),
            ..Default::default()
        })
    }

    pub fn invalid(&self, reason: impl Into<String>) -> BuildError {
        BuildError::invalid(self.role_group, reason)
    }
}

/// Produces the desired body of one kind; `Ok(None)` when the role group
/// does not want an object of this kind.
pub trait ObjectBuilder: Send + Sync {
    fn kind(&self) -> ObjectKind;

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError>;
}

/// Builders for every managed kind, keyed by kind.
pub fn standard_builders() -> BTreeMap<ObjectKind, Arc<dyn ObjectBuilder>> {
    let all: [Arc<dyn ObjectBuilder>; 6] = [
        Arc::new(SecretBuilder),
        Arc::new(ConfigMapBuilder),
        Arc::new(PvcBuilder),
        Arc::new(DeploymentBuilder),
        Arc::new(ServiceBuilder),
        Arc::new(PdbBuilder),
    ];
    all.into_iter().map(|b| (b.kind(), b)).collect()
}

/// Typed object to the dynamic form the reconciler works with.
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, BuildError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub(crate) fn warehouse_on_s3(dir: &str) -> bool {
    dir.starts_with("s3://") || dir.starts_with("s3a://")
}

/// Local data volume is only needed when the warehouse is not on S3.
pub(crate) fn wants_local_storage(config: &ResolvedConfig) -> bool {
    config.s3().is_none()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use strata_core::{ConfigLayer, HiveMetastoreSpec};

    pub fn instance() -> HiveMetastore {
        let mut hms = HiveMetastore::new("hms", HiveMetastoreSpec::default());
        hms.metadata.namespace = Some("data".into());
        hms.metadata.uid = Some("0b6f3c1e-1111-2222-3333-444455556666".into());
        hms
    }

    pub fn resolved(layer: ConfigLayer) -> ResolvedConfig {
        strata_resolve::resolve(None, None, Some(&layer), None)
    }
}
