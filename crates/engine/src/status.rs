//! Optimistic read-modify-write of `status.conditions`.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use metrics::counter;
use strata_core::{InstanceKey, StoreError};
use strata_kubehub::InstanceStore;
use strata_queue::backoff_delay;
use tracing::{debug, warn};

use crate::ReconcileError;

/// Bounded retry for status writes that lose a resourceVersion race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base: Duration::from_millis(50), max: Duration::from_secs(2) }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.base, self.max, attempt)
    }
}

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn InstanceStore>,
    policy: RetryPolicy,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn InstanceStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Re-read the instance, let `mutate` edit its conditions and write them
    /// back. `mutate` returning `false` means nothing changed and skips the
    /// write. Returns whether a write happened.
    pub async fn update<F>(&self, key: &InstanceKey, mut mutate: F) -> Result<bool, ReconcileError>
    where
        F: FnMut(&mut Vec<Condition>) -> bool + Send,
    {
        for attempt in 0..self.policy.max_attempts {
            let Some(mut instance) = self.store.get_instance(key).await? else {
                return Err(StoreError::NotFound(key.to_string()).into());
            };
            let mut conditions = instance.conditions().to_vec();
            if !mutate(&mut conditions) {
                return Ok(false);
            }
            instance.status.get_or_insert_with(Default::default).conditions = conditions;
            match self.store.replace_status(&instance).await {
                Ok(_) => {
                    debug!(key = %key, attempt, "status: written");
                    return Ok(true);
                }
                Err(e) if e.is_conflict() => {
                    counter!("status_conflict_retries_total", 1u64);
                    let delay = self.policy.backoff(attempt);
                    debug!(key = %key, attempt, delay_ms = %delay.as_millis(), "status: conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(key = %key, attempts = self.policy.max_attempts, "status: giving up after repeated conflicts");
        Err(ReconcileError::StatusConflict { key: key.clone(), attempts: self.policy.max_attempts })
    }
}
