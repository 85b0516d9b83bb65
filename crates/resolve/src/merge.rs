use std::collections::BTreeMap;

use strata_core::layer::{
    ConfigLayer, CpuLayer, DatabaseLayer, KerberosLayer, LoggingLayer, MemoryLayer, PdbLayer, ResourcesLayer, S3Layer,
    ServiceLayer, StorageLayer,
};

/// Fill the unset parts of `self` from a less specific layer.
pub trait Merge {
    fn merge(&mut self, fallback: &Self);
}

/// Scalars, lists and atomic records: keep ours when set.
fn atomic<T: Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(fallback);
    }
}

fn nested<T: Merge + Clone>(slot: &mut Option<T>, fallback: &Option<T>) {
    match (slot.as_mut(), fallback) {
        (Some(ours), Some(theirs)) => ours.merge(theirs),
        (None, Some(theirs)) => *slot = Some(theirs.clone()),
        _ => {}
    }
}

/// Key -> value maps: union, our keys win.
fn keyed<V: Clone>(slot: &mut Option<BTreeMap<String, V>>, fallback: &Option<BTreeMap<String, V>>) {
    let Some(theirs) = fallback else { return };
    let ours = slot.get_or_insert_with(BTreeMap::new);
    for (k, v) in theirs {
        ours.entry(k.clone()).or_insert_with(|| v.clone());
    }
}

/// file -> property -> value: union per file, our properties win.
fn keyed_nested(
    slot: &mut Option<BTreeMap<String, BTreeMap<String, String>>>,
    fallback: &Option<BTreeMap<String, BTreeMap<String, String>>>,
) {
    let Some(theirs) = fallback else { return };
    let ours = slot.get_or_insert_with(BTreeMap::new);
    for (file, props) in theirs {
        let target = ours.entry(file.clone()).or_default();
        for (k, v) in props {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

impl Merge for ConfigLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.replicas, &fallback.replicas);
        nested(&mut self.resources, &fallback.resources);
        atomic(&mut self.affinity, &fallback.affinity);
        keyed(&mut self.node_selector, &fallback.node_selector);
        atomic(&mut self.tolerations, &fallback.tolerations);
        atomic(&mut self.graceful_shutdown_timeout, &fallback.graceful_shutdown_timeout);
        nested(&mut self.logging, &fallback.logging);
        nested(&mut self.database, &fallback.database);
        nested(&mut self.s3, &fallback.s3);
        atomic(&mut self.warehouse_dir, &fallback.warehouse_dir);
        nested(&mut self.service, &fallback.service);
        nested(&mut self.pod_disruption_budget, &fallback.pod_disruption_budget);
        nested(&mut self.kerberos, &fallback.kerberos);
        keyed_nested(&mut self.config_overrides, &fallback.config_overrides);
        keyed(&mut self.env_overrides, &fallback.env_overrides);
    }
}

impl Merge for ResourcesLayer {
    fn merge(&mut self, fallback: &Self) {
        nested(&mut self.cpu, &fallback.cpu);
        nested(&mut self.memory, &fallback.memory);
        nested(&mut self.storage, &fallback.storage);
    }
}

impl Merge for CpuLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.min, &fallback.min);
        atomic(&mut self.max, &fallback.max);
    }
}

impl Merge for MemoryLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.limit, &fallback.limit);
    }
}

impl Merge for StorageLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.capacity, &fallback.capacity);
        atomic(&mut self.storage_class, &fallback.storage_class);
    }
}

impl Merge for LoggingLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.console, &fallback.console);
        atomic(&mut self.file, &fallback.file);
        keyed(&mut self.loggers, &fallback.loggers);
    }
}

impl Merge for DatabaseLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.driver, &fallback.driver);
        atomic(&mut self.host, &fallback.host);
        atomic(&mut self.port, &fallback.port);
        atomic(&mut self.database_name, &fallback.database_name);
        atomic(&mut self.username, &fallback.username);
        atomic(&mut self.password, &fallback.password);
    }
}

impl Merge for S3Layer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.endpoint, &fallback.endpoint);
        atomic(&mut self.region, &fallback.region);
        atomic(&mut self.bucket, &fallback.bucket);
        atomic(&mut self.path_style_access, &fallback.path_style_access);
        atomic(&mut self.ssl_enabled, &fallback.ssl_enabled);
        atomic(&mut self.max_connections, &fallback.max_connections);
        atomic(&mut self.access_key, &fallback.access_key);
        atomic(&mut self.secret_key, &fallback.secret_key);
    }
}

impl Merge for ServiceLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.service_type, &fallback.service_type);
        atomic(&mut self.port, &fallback.port);
        keyed(&mut self.annotations, &fallback.annotations);
    }
}

impl Merge for KerberosLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.secret_class, &fallback.secret_class);
        atomic(&mut self.realm, &fallback.realm);
    }
}

/// The two disruption bounds are one choice: the layer that sets either
/// of them decides both.
impl Merge for PdbLayer {
    fn merge(&mut self, fallback: &Self) {
        atomic(&mut self.enabled, &fallback.enabled);
        if self.min_available.is_none() && self.max_unavailable.is_none() {
            self.min_available = fallback.min_available;
            self.max_unavailable = fallback.max_unavailable;
        }
    }
}
