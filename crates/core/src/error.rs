/// Object store failures, classified for retry decisions.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not_found: {0}")]
    NotFound(String),
    /// Stale resourceVersion or name collision.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 429 || resp.code >= 500 => StoreError::Transient(resp.message.clone()),
            kube::Error::HyperError(_) | kube::Error::Service(_) => StoreError::Transient(e.to_string()),
            _ => StoreError::Fatal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Fatal(format!("serialize: {}", e))
    }
}

/// A builder could not produce a desired object from the resolved config.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("role group {group}: {reason}")]
    Invalid { group: String, reason: String },
    #[error("cannot attach owner reference: {0}")]
    OwnerReference(String),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BuildError {
    pub fn invalid(group: &str, reason: impl Into<String>) -> Self {
        BuildError::Invalid { group: group.to_string(), reason: reason.into() }
    }
}
