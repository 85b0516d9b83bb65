use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use strata_core::{BuildError, ObjectKind};

use crate::{to_dynamic, BuildContext, ObjectBuilder, THRIFT_PORT_NAME};

const SERVICE_TYPES: [&str; 3] = ["ClusterIP", "NodePort", "LoadBalancer"];

/// Thrift endpoint of the role group.
pub struct ServiceBuilder;

impl ObjectBuilder for ServiceBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::Service }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        let type_ = ctx.config.service_type();
        if !SERVICE_TYPES.contains(&type_) {
            return Err(ctx.invalid(format!("unsupported service type {}", type_)));
        }
        let mut metadata = ctx.metadata()?;
        metadata.annotations = ctx.config.layer().service.as_ref().and_then(|s| s.annotations.clone());
        let svc = Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                selector: Some(ctx.selector()),
                ports: Some(vec![ServicePort {
                    name: Some(THRIFT_PORT_NAME.into()),
                    port: ctx.config.service_port(),
                    target_port: Some(IntOrString::String(THRIFT_PORT_NAME.into())),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(Some(to_dynamic(&svc)?))
    }
}
