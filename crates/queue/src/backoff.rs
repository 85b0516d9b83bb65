use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use crate::QueueKey;

/// `base * 2^failures`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Per-key exponential backoff; a success resets the key.
pub struct Backoff<K> {
    failures: Mutex<FxHashMap<K, u32>>,
    base: Duration,
    max: Duration,
}

impl<K: QueueKey> Backoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { failures: Mutex::new(FxHashMap::default()), base, max }
    }

    /// Record a failure and return how long to wait before retrying.
    pub async fn next(&self, key: &K) -> Duration {
        let mut map = self.failures.lock().await;
        let n = map.entry(key.clone()).or_insert(0);
        let delay = backoff_delay(self.base, self.max, *n);
        *n = n.saturating_add(1);
        delay
    }

    /// Consecutive failures recorded for `key`.
    pub async fn failures(&self, key: &K) -> u32 {
        self.failures.lock().await.get(key).copied().unwrap_or(0)
    }

    pub async fn forget(&self, key: &K) {
        self.failures.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, max, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, max, 4), max);
        assert_eq!(backoff_delay(base, max, 64), max);
    }

    #[tokio::test]
    async fn failures_accumulate_per_key_until_forgotten() {
        let b = Backoff::new(Duration::from_millis(10), Duration::from_secs(5));
        assert_eq!(b.next(&"a").await, Duration::from_millis(10));
        assert_eq!(b.next(&"a").await, Duration::from_millis(20));
        assert_eq!(b.next(&"b").await, Duration::from_millis(10));
        assert_eq!(b.failures(&"a").await, 2);
        b.forget(&"a").await;
        assert_eq!(b.failures(&"a").await, 0);
        assert_eq!(b.failures(&"b").await, 1);
    }
}
