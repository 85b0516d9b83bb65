use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams, PostParams},
    core::DynamicObject,
    Client, ResourceExt,
};
use metrics::histogram;
use strata_core::{HiveMetastore, InstanceKey, ObjectKind, StoreError};
use tracing::debug;

use crate::{object_name, InstanceStore, ObjectStore};

pub async fn client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Object and instance store backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    pub fn client(&self) -> &Client { &self.client }

    fn objects(&self, kind: ObjectKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn instances(&self, namespace: Option<&str>) -> Api<HiveMetastore> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.objects(kind, namespace).get_opt(name).await?)
    }

    async fn create(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (ns, name) = object_name(obj)?;
        let t0 = std::time::Instant::now();
        let out = self.objects(kind, ns).create(&PostParams::default(), obj).await?;
        histogram!("store_write_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(kind = %kind, ns = %ns, name = %name, "store: create ok");
        Ok(out)
    }

    async fn update(&self, kind: ObjectKind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (ns, name) = object_name(obj)?;
        let t0 = std::time::Instant::now();
        let out = self.objects(kind, ns).replace(name, &PostParams::default(), obj).await?;
        histogram!("store_write_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(kind = %kind, ns = %ns, name = %name, "store: update ok");
        Ok(out)
    }

    async fn list(&self, kind: ObjectKind, namespace: &str, label_selector: &str) -> Result<Vec<DynamicObject>, StoreError> {
        let lp = ListParams::default().labels(label_selector);
        Ok(self.objects(kind, namespace).list(&lp).await?.items)
    }
}

#[async_trait]
impl InstanceStore for KubeStore {
    async fn get_instance(&self, key: &InstanceKey) -> Result<Option<HiveMetastore>, StoreError> {
        Ok(self.instances(Some(&key.namespace)).get_opt(&key.name).await?)
    }

    async fn list_instances(&self, namespace: Option<&str>) -> Result<Vec<HiveMetastore>, StoreError> {
        Ok(self.instances(namespace).list(&ListParams::default()).await?.items)
    }

    async fn replace_status(&self, instance: &HiveMetastore) -> Result<HiveMetastore, StoreError> {
        let ns = instance.namespace().ok_or_else(|| StoreError::Fatal("instance missing metadata.namespace".into()))?;
        let body = serde_json::to_vec(instance)?;
        Ok(self.instances(Some(&ns)).replace_status(&instance.name_any(), &PostParams::default(), body).await?)
    }
}
