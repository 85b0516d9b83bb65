use std::time::Duration;

use crate::RetryPolicy;

/// Engine and controller tunables, read from `STRATA_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub workers: usize,
    pub resync: Duration,
    pub status_retry: RetryPolicy,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive permanent failures before `Available` turns `Blocked`.
    pub blocked_after: u32,
    pub workload_ready_gate: bool,
    pub workload_requeue: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync: Duration::from_secs(300),
            status_retry: RetryPolicy::default(),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
            blocked_after: 5,
            workload_ready_gate: true,
            workload_requeue: Duration::from_secs(10),
        }
    }
}

fn env_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            workers: env_num("STRATA_WORKERS").unwrap_or(d.workers),
            resync: env_num("STRATA_RESYNC_SECS").map(Duration::from_secs).unwrap_or(d.resync),
            status_retry: RetryPolicy {
                max_attempts: env_num("STRATA_STATUS_RETRIES").unwrap_or(d.status_retry.max_attempts),
                ..d.status_retry
            },
            backoff_base: env_num("STRATA_BACKOFF_BASE_MS").map(Duration::from_millis).unwrap_or(d.backoff_base),
            backoff_max: env_num("STRATA_BACKOFF_MAX_SECS").map(Duration::from_secs).unwrap_or(d.backoff_max),
            blocked_after: env_num("STRATA_BLOCKED_AFTER").unwrap_or(d.blocked_after),
            workload_ready_gate: env_flag("STRATA_WORKLOAD_READY_GATE").unwrap_or(d.workload_ready_gate),
            workload_requeue: env_num("STRATA_WORKLOAD_REQUEUE_SECS").map(Duration::from_secs).unwrap_or(d.workload_requeue),
        }
    }
}
