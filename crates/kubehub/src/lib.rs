//! Strata kubehub: object store seams, their kube-backed and in-memory
//! implementations, and the watchers that turn cluster events into instance keys.

#![forbid(unsafe_code)]

mod kube_store;
mod mem;
mod watch;

use async_trait::async_trait;
use kube::core::DynamicObject;
use strata_core::{HiveMetastore, InstanceKey, ObjectKind, StoreError};

pub use kube_store::{client, KubeStore};
pub use mem::{CallCounts, MemStore};
pub use watch::{owner_instance_key, resync_instances, watch_instances, watch_owned};

/// Managed child objects, addressed by (kind, namespace, name).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError>;

    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace; `obj.metadata.resourceVersion` must match the stored object.
    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn list(&self, kind: ObjectKind, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, StoreError>;
}

/// Root instances and their status subresource.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<HiveMetastore>, StoreError>;

    async fn list_instances(&self, namespace: Option<&str>) -> Result<Vec<HiveMetastore>, StoreError>;

    /// Write `instance.status`, guarded by `instance.metadata.resourceVersion`.
    async fn replace_status(&self, instance: &HiveMetastore) -> Result<HiveMetastore, StoreError>;
}

pub(crate) fn object_name(obj: &DynamicObject) -> Result<(&str, &str), StoreError> {
    let ns = obj.metadata.namespace.as_deref().ok_or_else(|| StoreError::Fatal("object missing metadata.namespace".into()))?;
    let name = obj.metadata.name.as_deref().ok_or_else(|| StoreError::Fatal("object missing metadata.name".into()))?;
    Ok((ns, name))
}
