//! Strata apply: converge one desired object against the live store using
//! last-applied snapshots and per-kind field preservation.

#![forbid(unsafe_code)]

pub mod patch;
pub mod preserve;

use std::sync::Arc;

use kube::core::DynamicObject;
use metrics::counter;
use strata_core::{ObjectKind, StoreError};
use strata_kubehub::ObjectStore;
use tracing::{debug, error, info};

pub use patch::{diff_summary, DiffSummary, LAST_APPLIED_ANNOTATION};
pub use preserve::{FieldPreserver, KindRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl ApplyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Store(e) if e.is_conflict())
    }
}

/// Creates or updates managed objects. Holds no state between calls.
#[derive(Clone)]
pub struct ObjectReconciler {
    store: Arc<dyn ObjectStore>,
    registry: Arc<KindRegistry>,
}

impl ObjectReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<KindRegistry>) -> Self {
        Self { store, registry }
    }

    /// Fetch the live object, then [`apply`](Self::apply).
    pub async fn reconcile(&self, kind: ObjectKind, desired: DynamicObject) -> Result<bool, ApplyError> {
        let ns = desired.metadata.namespace.clone().unwrap_or_default();
        let name = desired.metadata.name.clone().unwrap_or_default();
        let current = self.store.get(kind, &ns, &name).await?;
        self.apply(kind, current, desired).await
    }

    /// Converge `desired` against `current`. Returns whether a write was issued.
    ///
    /// Stale resourceVersion conflicts are returned, never retried here.
    pub async fn apply(&self, kind: ObjectKind, current: Option<DynamicObject>, mut desired: DynamicObject) -> Result<bool, ApplyError> {
        let name = desired.metadata.name.clone().unwrap_or_default();
        let Some(current) = current else {
            patch::attach_snapshot(&mut desired)?;
            self.store.create(kind, &desired).await?;
            counter!("apply_create_total", 1u64);
            info!(kind = %kind, name = %name, "apply: created");
            return Ok(true);
        };

        self.registry.preserver(kind).preserve(&current, &mut desired);

        match patch::compute_patch(&current, &desired) {
            Ok(p) if patch::is_empty(&p) => {
                counter!("apply_noop_total", 1u64);
                debug!(kind = %kind, name = %name, "apply: up to date");
                return Ok(false);
            }
            Ok(p) => {
                let live = patch::strip_noisy(serde_json::to_value(&current)?);
                let summary = patch::diff_summary(&p, &live);
                debug!(kind = %kind, name = %name, adds = summary.adds, updates = summary.updates, removes = summary.removes, "apply: drift detected");
            }
            Err(e) => {
                counter!("apply_patch_fallback_total", 1u64);
                error!(kind = %kind, name = %name, error = %e, "apply: patch calculation failed; updating unconditionally");
            }
        }

        patch::attach_snapshot(&mut desired)?;
        desired.metadata.resource_version = current.metadata.resource_version.clone();
        self.store.update(kind, &desired).await?;
        counter!("apply_update_total", 1u64);
        info!(kind = %kind, name = %name, "apply: updated");
        Ok(true)
    }
}
