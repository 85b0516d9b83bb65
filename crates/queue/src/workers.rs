use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{Backoff, QueueKey, WorkQueue};

/// Spawn `workers` tasks draining `queue` through `handler`.
///
/// `Ok(Some(d))` re-adds the key after `d`, `Ok(None)` finishes it, and
/// `Err` re-adds it after the key's backoff. Workers exit on shutdown.
pub fn run_workers<K, F, Fut, E>(
    queue: WorkQueue<K>,
    backoff: Arc<Backoff<K>>,
    workers: usize,
    handler: F,
) -> Vec<JoinHandle<()>>
where
    K: QueueKey,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Duration>, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let handler = Arc::new(handler);
    (0..workers.max(1))
        .map(|id| {
            let queue = queue.clone();
            let backoff = Arc::clone(&backoff);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    let t0 = Instant::now();
                    let res = handler(key.clone()).await;
                    histogram!("worker_pass_ms", t0.elapsed().as_secs_f64() * 1000.0);
                    queue.done(&key).await;
                    match res {
                        Ok(Some(after)) => {
                            backoff.forget(&key).await;
                            debug!(worker = id, key = ?key, requeue_ms = %after.as_millis(), "worker: requeue requested");
                            queue.add_after(key, after);
                        }
                        Ok(None) => backoff.forget(&key).await,
                        Err(e) => {
                            counter!("worker_errors_total", 1u64);
                            let delay = backoff.next(&key).await;
                            warn!(worker = id, key = ?key, error = %e, retry_ms = %delay.as_millis(), "worker: pass failed");
                            queue.add_after(key, delay);
                        }
                    }
                }
                debug!(worker = id, "worker: queue shut down");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_keys_are_retried_with_backoff() {
        let q = WorkQueue::new();
        let backoff = Arc::new(Backoff::new(Duration::from_millis(5), Duration::from_millis(20)));
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let handles = run_workers(q.clone(), Arc::clone(&backoff), 2, move |_k: &'static str| {
            let seen = Arc::clone(&seen);
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let out: Result<Option<Duration>, &'static str> = if n < 2 { Err("boom") } else { Ok(None) };
                out
            }
        });
        q.add("a").await;
        let deadline = Instant::now() + Duration::from_secs(2);
        while attempts.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backoff.failures(&"a").await, 0);
        q.shutdown().await;
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_key_is_never_processed_concurrently() {
        let q = WorkQueue::new();
        let backoff = Arc::new(Backoff::new(Duration::from_millis(5), Duration::from_millis(20)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let passes = Arc::new(AtomicUsize::new(0));
        let (a, p, n) = (Arc::clone(&active), Arc::clone(&peak), Arc::clone(&passes));
        let handles = run_workers(q.clone(), backoff, 4, move |_k: &'static str| {
            let (a, p, n) = (Arc::clone(&a), Arc::clone(&p), Arc::clone(&n));
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                n.fetch_add(1, Ordering::SeqCst);
                Ok::<Option<Duration>, String>(None)
            }
        });
        for _ in 0..10 {
            q.add("same").await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while (!q.is_empty().await || q.in_flight().await > 0) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        let total = passes.load(Ordering::SeqCst);
        assert!((1..=10).contains(&total), "passes: {}", total);
        q.shutdown().await;
        for h in handles {
            h.await.unwrap();
        }
    }
}
