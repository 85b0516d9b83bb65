use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use kube::core::DynamicObject;
use strata_core::{BuildError, ObjectKind};

use crate::{to_dynamic, wants_local_storage, BuildContext, ObjectBuilder};

pub const DEFAULT_CAPACITY: &str = "10Gi";

/// Warehouse volume for role groups that keep data locally.
pub struct PvcBuilder;

impl ObjectBuilder for PvcBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::PersistentVolumeClaim }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        if !wants_local_storage(ctx.config) {
            return Ok(None);
        }
        let storage = ctx.config.layer().resources.as_ref().and_then(|r| r.storage.as_ref());
        let capacity = storage.and_then(|s| s.capacity.clone()).unwrap_or_else(|| DEFAULT_CAPACITY.to_string());
        let capacity = crate::deployment::check_quantity(ctx, "storage capacity", &capacity)?;

        let mut spec = PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.and_then(|s| s.storage_class.clone()),
            resources: Some(Default::default()),
            ..Default::default()
        };
        if let Some(res) = spec.resources.as_mut() {
            res.requests = Some(BTreeMap::from([("storage".to_string(), capacity)]));
        }
        let pvc = PersistentVolumeClaim { metadata: ctx.metadata()?, spec: Some(spec), ..Default::default() };
        Ok(Some(to_dynamic(&pvc)?))
    }
}
