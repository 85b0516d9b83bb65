//! Strata core types: the HiveMetastore resource, config layers, condition helpers and errors

#![forbid(unsafe_code)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod kinds;
pub mod layer;
pub mod names;

pub use crd::{ClusterOperation, HiveMetastore, HiveMetastoreSpec, HiveMetastoreStatus, ImageSpec, RoleGroupSpec};
pub use error::{BuildError, StoreError};
pub use kinds::ObjectKind;
pub use layer::ConfigLayer;
pub use names::InstanceKey;
