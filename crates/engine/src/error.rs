use strata_apply::ApplyError;
use strata_core::{BuildError, InstanceKey, StoreError};

/// Why a reconcile pass failed. Every variant is retried by the controller;
/// permanent ones eventually mark the instance `Blocked`.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("build: {0}")]
    Build(BuildError),
    #[error("apply: {0}")]
    Apply(#[from] ApplyError),
    #[error("owner reference: {0}")]
    OwnerReference(String),
    #[error("status of {key} still conflicting after {attempts} attempts")]
    StatusConflict { key: InstanceKey, attempts: u32 },
}

impl ReconcileError {
    /// Will not go away without a spec change.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ReconcileError::Build(_) | ReconcileError::OwnerReference(_))
    }
}

impl From<BuildError> for ReconcileError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::OwnerReference(msg) => ReconcileError::OwnerReference(msg),
            other => ReconcileError::Build(other),
        }
    }
}
