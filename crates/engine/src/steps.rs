//! Reconcile steps: one ordered task per managed kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use strata_apply::ObjectReconciler;
use strata_builders::{BuildContext, ObjectBuilder};
use strata_core::{HiveMetastore, ObjectKind};
use strata_kubehub::ObjectStore;
use strata_resolve::RoleGroupConfig;
use tracing::debug;

use crate::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Step succeeded but wants the pass restarted after the delay.
    RequeueAfter(Duration),
}

/// What a step sees of the current pass.
pub struct PassContext<'a> {
    pub instance: &'a HiveMetastore,
    pub role_groups: &'a [RoleGroupConfig],
}

#[async_trait]
pub trait ReconcileStep: Send + Sync {
    /// Human name, used in the condition message.
    fn name(&self) -> &str;

    fn condition_type(&self) -> String;

    async fn run(&self, pass: &PassContext<'_>) -> Result<StepOutcome, ReconcileError>;
}

/// Builds and applies one kind for every role group.
pub struct ResourceStep {
    kind: ObjectKind,
    builder: Arc<dyn ObjectBuilder>,
    reconciler: ObjectReconciler,
    objects: Arc<dyn ObjectStore>,
    /// Requeue delay while the workload is not ready; `None` disables the gate.
    ready_gate: Option<Duration>,
}

impl ResourceStep {
    pub fn new(builder: Arc<dyn ObjectBuilder>, reconciler: ObjectReconciler, objects: Arc<dyn ObjectStore>) -> Self {
        Self { kind: builder.kind(), builder, reconciler, objects, ready_gate: None }
    }

    pub fn with_ready_gate(mut self, requeue: Duration) -> Self {
        self.ready_gate = Some(requeue);
        self
    }

    pub fn kind(&self) -> ObjectKind { self.kind }

    async fn is_ready(&self, namespace: &str, name: &str) -> Result<bool, ReconcileError> {
        let Some(live) = self.objects.get(self.kind, namespace, name).await? else {
            return Ok(false);
        };
        let wanted = live.data["spec"]["replicas"].as_i64().unwrap_or(1);
        let generation = live.metadata.generation.unwrap_or(0);
        let status = &live.data["status"];
        let observed = status["observedGeneration"].as_i64().unwrap_or(0);
        let updated = status["updatedReplicas"].as_i64().unwrap_or(0);
        let ready = status["readyReplicas"].as_i64().unwrap_or(0);
        debug!(kind = %self.kind, name = %name, wanted, generation, observed, updated, ready, "step: workload readiness");
        // old pods can be ready while the new template is still rolling out
        Ok(observed >= generation && updated >= wanted && ready >= wanted)
    }
}

#[async_trait]
impl ReconcileStep for ResourceStep {
    fn name(&self) -> &str { self.kind.short_name() }

    fn condition_type(&self) -> String { self.kind.condition_type() }

    async fn run(&self, pass: &PassContext<'_>) -> Result<StepOutcome, ReconcileError> {
        let namespace = pass.instance.namespace().unwrap_or_default();
        let mut applied = Vec::with_capacity(pass.role_groups.len());
        for rg in pass.role_groups {
            let ctx = BuildContext::new(pass.instance, &rg.name, &rg.config);
            let Some(desired) = self.builder.build(&ctx)? else {
                debug!(kind = %self.kind, role_group = %rg.name, "step: not wanted for role group");
                continue;
            };
            self.reconciler.reconcile(self.kind, desired).await?;
            applied.push(ctx.name());
        }
        if let Some(requeue) = self.ready_gate {
            for name in &applied {
                if !self.is_ready(&namespace, name).await? {
                    return Ok(StepOutcome::RequeueAfter(requeue));
                }
            }
        }
        Ok(StepOutcome::Done)
    }
}
