use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use strata_core::{BuildError, ObjectKind};

use crate::{to_dynamic, BuildContext, ObjectBuilder};

/// Disruption budget; skipped when `podDisruptionBudget.enabled` is false.
pub struct PdbBuilder;

impl ObjectBuilder for PdbBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::PodDisruptionBudget }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        if !ctx.config.pdb_enabled() {
            return Ok(None);
        }
        let layer = ctx.config.layer().pod_disruption_budget.clone().unwrap_or_default();
        let (min_available, max_unavailable) = match (layer.min_available, layer.max_unavailable) {
            (Some(_), Some(_)) => {
                return Err(ctx.invalid("podDisruptionBudget sets both minAvailable and maxUnavailable"));
            }
            (Some(min), None) => (Some(IntOrString::Int(min)), None),
            (None, max) => (None, Some(IntOrString::Int(max.unwrap_or(1)))),
        };
        let pdb = PodDisruptionBudget {
            metadata: ctx.metadata()?,
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector { match_labels: Some(ctx.selector()), ..Default::default() }),
                min_available,
                max_unavailable,
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(Some(to_dynamic(&pdb)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{instance, resolved};
    use strata_core::layer::PdbLayer;
    use strata_core::ConfigLayer;

    fn build(pdb: Option<PdbLayer>) -> Result<Option<DynamicObject>, BuildError> {
        let hms = instance();
        let cfg = resolved(ConfigLayer { pod_disruption_budget: pdb, ..Default::default() });
        PdbBuilder.build(&BuildContext::new(&hms, "default", &cfg))
    }

    #[test]
    fn default_allows_one_unavailable() {
        let obj = build(None).unwrap().unwrap();
        assert_eq!(obj.data["spec"]["maxUnavailable"], 1);
        assert!(obj.data["spec"].get("minAvailable").is_none());
    }

    #[test]
    fn min_available_wins_when_set_alone() {
        let obj = build(Some(PdbLayer { min_available: Some(2), ..Default::default() })).unwrap().unwrap();
        assert_eq!(obj.data["spec"]["minAvailable"], 2);
        assert!(obj.data["spec"].get("maxUnavailable").is_none());
    }

    #[test]
    fn disabled_budget_is_skipped() {
        assert!(build(Some(PdbLayer { enabled: Some(false), ..Default::default() })).unwrap().is_none());
    }

    #[test]
    fn layered_bounds_build_from_the_most_specific_layer() {
        let hms = instance();
        let cluster = ConfigLayer {
            pod_disruption_budget: Some(PdbLayer { min_available: Some(1), ..Default::default() }),
            ..Default::default()
        };
        let group = ConfigLayer {
            pod_disruption_budget: Some(PdbLayer { max_unavailable: Some(2), ..Default::default() }),
            ..Default::default()
        };
        let cfg = strata_resolve::resolve(Some(&cluster), None, Some(&group), None);
        let obj = PdbBuilder.build(&BuildContext::new(&hms, "default", &cfg)).unwrap().unwrap();
        assert_eq!(obj.data["spec"]["maxUnavailable"], 2);
        assert!(obj.data["spec"].get("minAvailable").is_none());
    }

    #[test]
    fn both_bounds_in_one_layer_are_rejected() {
        let pdb = PdbLayer { enabled: None, min_available: Some(1), max_unavailable: Some(1) };
        assert!(build(Some(pdb)).is_err());
    }
}
