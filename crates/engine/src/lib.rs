//! Strata engine: runs the ordered reconcile steps for one HiveMetastore
//! instance and records their outcome as status conditions.
//!
//! A pass loads the instance, reinitializes the condition set when the
//! generation moved, resolves every role group, then runs the steps in order.
//! The first error or requeue request ends the pass.

#![forbid(unsafe_code)]

mod config;
pub mod controller;
mod error;
mod status;
mod steps;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use metrics::{counter, histogram};
use strata_apply::{KindRegistry, ObjectReconciler};
use strata_builders::ObjectBuilder;
use strata_core::conditions::{
    initial_conditions, needs_init, set_condition, ConditionUpdate, REASON_BLOCKED, REASON_RUNNING, TYPE_AVAILABLE,
    TYPE_PROGRESSING,
};
use strata_core::{InstanceKey, ObjectKind};
use strata_kubehub::{InstanceStore, ObjectStore};
use tracing::{debug, info, info_span, warn, Instrument, Span};

pub use config::EngineConfig;
pub use error::ReconcileError;
pub use status::{RetryPolicy, StatusReporter};
pub use steps::{PassContext, ReconcileStep, ResourceStep, StepOutcome};

pub struct Engine {
    instances: Arc<dyn InstanceStore>,
    status: StatusReporter,
    steps: Vec<Arc<dyn ReconcileStep>>,
    span: Span,
}

/// One resource step per kind with a builder, in `ObjectKind::ALL` order.
pub fn standard_steps(
    objects: Arc<dyn ObjectStore>,
    registry: Arc<KindRegistry>,
    builders: &BTreeMap<ObjectKind, Arc<dyn ObjectBuilder>>,
    config: &EngineConfig,
) -> Vec<Arc<dyn ReconcileStep>> {
    let reconciler = ObjectReconciler::new(Arc::clone(&objects), registry);
    ObjectKind::ALL
        .iter()
        .filter_map(|kind| builders.get(kind))
        .map(|builder| {
            let mut step = ResourceStep::new(Arc::clone(builder), reconciler.clone(), Arc::clone(&objects));
            if step.kind() == ObjectKind::Deployment && config.workload_ready_gate {
                step = step.with_ready_gate(config.workload_requeue);
            }
            Arc::new(step) as Arc<dyn ReconcileStep>
        })
        .collect()
}

fn running_message(server: &str, step: &str) -> String {
    format!("{}Server's {} is running", server, step)
}

impl Engine {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        instances: Arc<dyn InstanceStore>,
        registry: Arc<KindRegistry>,
        builders: BTreeMap<ObjectKind, Arc<dyn ObjectBuilder>>,
        config: &EngineConfig,
        span: Span,
    ) -> Self {
        let steps = standard_steps(objects, registry, &builders, config);
        Self::with_steps(instances, steps, config.status_retry, span)
    }

    /// Engine over an explicit step list.
    pub fn with_steps(instances: Arc<dyn InstanceStore>, steps: Vec<Arc<dyn ReconcileStep>>, retry: RetryPolicy, span: Span) -> Self {
        let status = StatusReporter::new(Arc::clone(&instances), retry);
        Self { instances, status, steps, span }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run one pass. `Ok(Some(d))` asks to be called again after `d`.
    pub async fn reconcile(&self, key: &InstanceKey) -> Result<Option<Duration>, ReconcileError> {
        let span = info_span!(parent: &self.span, "reconcile", key = %key);
        let t0 = Instant::now();
        counter!("reconcile_passes_total", 1u64);
        let res = self.pass(key).instrument(span).await;
        histogram!("reconcile_pass_ms", t0.elapsed().as_secs_f64() * 1000.0);
        if res.is_err() {
            counter!("reconcile_errors_total", 1u64);
        }
        res
    }

    async fn pass(&self, key: &InstanceKey) -> Result<Option<Duration>, ReconcileError> {
        let Some(instance) = self.instances.get_instance(key).await? else {
            debug!("engine: instance gone; owned objects are garbage collected");
            return Ok(None);
        };
        if instance.is_paused() {
            info!("engine: reconciliation paused");
            return Ok(None);
        }
        let generation = instance.metadata.generation;

        if needs_init(instance.conditions(), generation) {
            info!(generation = ?generation, "engine: new generation; resetting conditions");
            self.status
                .update(key, |c| {
                    if !needs_init(c, generation) {
                        return false;
                    }
                    *c = initial_conditions(generation);
                    true
                })
                .await?;
        }

        let role_groups = strata_resolve::resolve_role_groups(&instance.spec);
        let server = instance.name_any();
        let ctx = PassContext { instance: &instance, role_groups: &role_groups };

        for step in &self.steps {
            let outcome = match step.run(&ctx).await {
                Ok(o) => o,
                Err(e) => {
                    warn!(step = %step.name(), error = %e, "engine: step failed");
                    return Err(e);
                }
            };
            let update = ConditionUpdate::new(step.condition_type(), true, REASON_RUNNING, running_message(&server, step.name()));
            self.status.update(key, |c| set_condition(c, update.clone(), generation)).await?;
            if let StepOutcome::RequeueAfter(after) = outcome {
                debug!(step = %step.name(), requeue_ms = %after.as_millis(), "engine: step requested requeue");
                return Ok(Some(after));
            }
        }

        let available = ConditionUpdate::new(TYPE_AVAILABLE, true, REASON_RUNNING, "all resources are running");
        let progressing = ConditionUpdate::new(TYPE_PROGRESSING, false, REASON_RUNNING, "reconcile complete");
        let wrote = self
            .status
            .update(key, |c| set_condition(c, available.clone(), generation) | set_condition(c, progressing.clone(), generation))
            .await?;
        if wrote {
            info!(generation = ?generation, "engine: instance available");
        }
        Ok(None)
    }

    /// Surface a persistent failure as `Available=False/Blocked`.
    pub async fn mark_blocked(&self, key: &InstanceKey, err: &ReconcileError) -> Result<bool, ReconcileError> {
        let Some(instance) = self.instances.get_instance(key).await? else {
            return Ok(false);
        };
        let generation = instance.metadata.generation;
        let update = ConditionUpdate::new(TYPE_AVAILABLE, false, REASON_BLOCKED, err.to_string());
        let wrote = self.status.update(key, |c| set_condition(c, update.clone(), generation)).await?;
        if wrote {
            warn!(key = %key, error = %err, "engine: instance blocked");
        }
        Ok(wrote)
    }
}
