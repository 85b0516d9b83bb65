//! Controller loop: event sources feed a work queue drained by workers that
//! run engine passes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kube::Client;
use strata_core::{InstanceKey, ObjectKind};
use strata_kubehub::{resync_instances, watch_instances, watch_owned, InstanceStore};
use strata_queue::{run_workers, Backoff, WorkQueue};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{Engine, EngineConfig, ReconcileError};

/// One worker pass: reconcile, and once a permanent error has repeated
/// `blocked_after` times in a row, write the `Blocked` condition.
pub async fn process(
    engine: &Engine,
    backoff: &Backoff<InstanceKey>,
    blocked_after: u32,
    key: &InstanceKey,
) -> Result<Option<Duration>, ReconcileError> {
    let res = engine.reconcile(key).await;
    if let Err(e) = &res {
        let consecutive = backoff.failures(key).await + 1;
        if e.is_permanent() && consecutive >= blocked_after {
            if let Err(se) = engine.mark_blocked(key, e).await {
                warn!(key = %key, error = %se, "controller: could not record blocked condition");
            }
        }
    }
    res
}

/// Forward keys from the event channel into the queue until every sender is gone.
pub fn spawn_forwarder(queue: WorkQueue<InstanceKey>, mut rx: mpsc::Receiver<InstanceKey>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(key) = rx.recv().await {
            queue.add(key).await;
        }
    })
}

/// Run watchers, periodic resync and workers until Ctrl-C.
pub async fn run(
    client: Client,
    engine: Arc<Engine>,
    instances: Arc<dyn InstanceStore>,
    config: EngineConfig,
    namespace: Option<String>,
) -> Result<()> {
    let queue: WorkQueue<InstanceKey> = WorkQueue::new();
    let backoff = Arc::new(Backoff::new(config.backoff_base, config.backoff_max));
    let (tx, rx) = mpsc::channel::<InstanceKey>(1024);
    let forwarder = spawn_forwarder(queue.clone(), rx);

    let mut sources = Vec::new();
    {
        let (client, ns, tx) = (client.clone(), namespace.clone(), tx.clone());
        sources.push(tokio::spawn(async move { watch_instances(client, ns.as_deref(), tx).await }));
    }
    for kind in ObjectKind::ALL {
        let (client, ns, tx) = (client.clone(), namespace.clone(), tx.clone());
        sources.push(tokio::spawn(async move { watch_owned(client, kind, ns.as_deref(), tx).await }));
    }
    {
        let (ns, tx, every) = (namespace.clone(), tx.clone(), config.resync);
        let instances = Arc::clone(&instances);
        sources.push(tokio::spawn(async move { resync_instances(&*instances, ns.as_deref(), every, tx).await }));
    }
    drop(tx);

    let blocked_after = config.blocked_after;
    let handler_backoff = Arc::clone(&backoff);
    let workers = run_workers(queue.clone(), backoff, config.workers, move |key: InstanceKey| {
        let engine = Arc::clone(&engine);
        let backoff = Arc::clone(&handler_backoff);
        async move { process(&engine, &backoff, blocked_after, &key).await }
    });
    info!(workers = config.workers, ns = ?namespace, resync_secs = config.resync.as_secs(), "controller: started");

    tokio::signal::ctrl_c().await?;
    info!("controller: shutting down");
    for s in &sources {
        s.abort();
    }
    queue.shutdown().await;
    for w in workers {
        let _ = w.await;
    }
    forwarder.abort();
    Ok(())
}
