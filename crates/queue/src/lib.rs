//! Strata queue: keyed work queue with coalescing and single-flight delivery

#![forbid(unsafe_code)]

mod backoff;
mod workers;

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::FxHashSet;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

pub use backoff::{backoff_delay, Backoff};
pub use workers::run_workers;

/// Bound for queue keys.
pub trait QueueKey: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static {}
impl<T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static> QueueKey for T {}

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting for delivery (queued, or re-added while in flight).
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
}

/// FIFO of keys where each key is pending at most once and handed to at most
/// one worker at a time. A key added while in flight is delivered again after
/// `done`.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self { Self::new() }
}

impl<K: QueueKey> WorkQueue<K> {
    pub fn new() -> Self {
        let state = State { queue: VecDeque::new(), dirty: FxHashSet::default(), processing: FxHashSet::default(), shutting_down: false };
        Self { inner: Arc::new(Inner { state: Mutex::new(state), notify: Notify::new() }) }
    }

    pub async fn add(&self, key: K) {
        let mut st = self.inner.state.lock().await;
        if st.shutting_down {
            return;
        }
        if st.dirty.contains(&key) {
            counter!("queue_coalesced_total", 1u64);
            return;
        }
        counter!("queue_adds_total", 1u64);
        st.dirty.insert(key.clone());
        if st.processing.contains(&key) {
            debug!(key = ?key, "queue: key in flight; deferring");
            return;
        }
        st.queue.push_back(key);
        gauge!("queue_depth", st.queue.len() as f64);
        drop(st);
        self.inner.notify.notify_one();
    }

    /// Re-add `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        let q = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            q.add(key).await;
        });
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut st = self.inner.state.lock().await;
                if st.shutting_down {
                    return None;
                }
                if let Some(key) = st.queue.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    gauge!("queue_depth", st.queue.len() as f64);
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key`; re-queue it if it was added while in flight.
    pub async fn done(&self, key: &K) {
        let mut st = self.inner.state.lock().await;
        st.processing.remove(key);
        if st.dirty.contains(key) && !st.shutting_down {
            st.queue.push_back(key.clone());
            drop(st);
            self.inner.notify.notify_one();
        }
    }

    pub async fn len(&self) -> usize { self.inner.state.lock().await.queue.len() }

    pub async fn is_empty(&self) -> bool { self.len().await == 0 }

    pub async fn in_flight(&self) -> usize { self.inner.state.lock().await.processing.len() }

    pub async fn shutdown(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
    }
}
