use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "hive-metastore";
pub const ROLE_NAME: &str = "metastore";
pub const MANAGED_BY: &str = "strata-operator";
pub const ROLE_GROUP_LABEL: &str = "strata.dev/role-group";

/// Work-queue key of a root instance: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for InstanceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => Ok(Self::new(ns, name)),
            _ => Err(format!("invalid instance key: {} (expect namespace/name)", s)),
        }
    }
}

/// Name shared by every object managed for one role group.
pub fn role_group_resource_name(instance: &str, role_group: &str) -> String {
    format!("{}-{}-{}", instance, ROLE_NAME, role_group)
}

pub fn role_group_labels(instance: &str, role_group: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(instance, role_group);
    labels.insert("app.kubernetes.io/managed-by".into(), MANAGED_BY.into());
    labels
}

/// Subset of the labels that is stable enough for pod selectors.
pub fn selector_labels(instance: &str, role_group: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), APP_NAME.to_string()),
        ("app.kubernetes.io/instance".to_string(), instance.to_string()),
        ("app.kubernetes.io/component".to_string(), ROLE_NAME.to_string()),
        (ROLE_GROUP_LABEL.to_string(), role_group.to_string()),
    ])
}
