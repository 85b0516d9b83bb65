use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvFromSource, EnvVar, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::DynamicObject;
use strata_core::{BuildError, ObjectKind};

use crate::config_map::{config_files, DEFAULT_WAREHOUSE_DIR};
use crate::{kerberos, to_dynamic, wants_local_storage, BuildContext, ObjectBuilder};

pub const CONTAINER_NAME: &str = "metastore";
pub const THRIFT_PORT: i32 = 9083;
pub const THRIFT_PORT_NAME: &str = "thrift";

const CONF_DIR: &str = "/opt/hive/conf";
const CONFIG_VOLUME: &str = "config";
const DATA_VOLUME: &str = "data";

const SUFFIXES: [&str; 14] = ["", "m", "k", "M", "G", "T", "P", "E", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Accepts the decimal-SI and binary-SI forms `kubectl` would.
fn is_quantity(raw: &str) -> bool {
    let split = raw.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number_ok = !number.is_empty() && number.parse::<f64>().is_ok();
    let suffix_ok = SUFFIXES.contains(&suffix)
        || (suffix.len() > 1 && (suffix.starts_with('e') || suffix.starts_with('E')) && suffix[1..].parse::<i32>().is_ok());
    number_ok && suffix_ok
}

pub(crate) fn check_quantity(ctx: &BuildContext<'_>, what: &str, raw: &str) -> Result<Quantity, BuildError> {
    if is_quantity(raw) {
        Ok(Quantity(raw.to_string()))
    } else {
        Err(ctx.invalid(format!("{} {:?} is not a valid quantity", what, raw)))
    }
}

fn resources(ctx: &BuildContext<'_>) -> Result<Option<ResourceRequirements>, BuildError> {
    let Some(res) = ctx.config.layer().resources.as_ref() else {
        return Ok(None);
    };
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(cpu) = &res.cpu {
        if let Some(min) = &cpu.min {
            requests.insert("cpu".to_string(), check_quantity(ctx, "cpu min", min)?);
        }
        if let Some(max) = &cpu.max {
            limits.insert("cpu".to_string(), check_quantity(ctx, "cpu max", max)?);
        }
    }
    if let Some(limit) = res.memory.as_ref().and_then(|m| m.limit.as_ref()) {
        let q = check_quantity(ctx, "memory limit", limit)?;
        requests.insert("memory".to_string(), q.clone());
        limits.insert("memory".to_string(), q);
    }
    if requests.is_empty() && limits.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }))
}

/// The metastore workload itself.
pub struct DeploymentBuilder;

impl ObjectBuilder for DeploymentBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::Deployment }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        let name = ctx.name();
        let cfg = ctx.config;
        let layer = cfg.layer();
        let image = ctx.instance.image();
        let replicas = if ctx.instance.is_stopped() { 0 } else { cfg.replicas() };

        let krb = kerberos::settings(ctx)?;

        let mut env: Vec<EnvVar> = layer
            .env_overrides
            .iter()
            .flatten()
            .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() })
            .collect();

        // one subPath mount per ConfigMap key; the rest of the image's conf dir stays in place
        let mut mounts: Vec<VolumeMount> = config_files(cfg)
            .into_iter()
            .map(|file| VolumeMount {
                name: CONFIG_VOLUME.into(),
                mount_path: format!("{}/{}", CONF_DIR, file),
                sub_path: Some(file),
                ..Default::default()
            })
            .collect();
        let mut volumes = vec![Volume {
            name: CONFIG_VOLUME.into(),
            config_map: Some(ConfigMapVolumeSource { name: Some(name.clone()), ..Default::default() }),
            ..Default::default()
        }];
        if let Some(krb) = &krb {
            // envOverrides win over the Kerberos defaults
            let extra: Vec<EnvVar> = krb.env().into_iter().filter(|e| !env.iter().any(|o| o.name == e.name)).collect();
            env.extend(extra);
            mounts.push(krb.mount());
            volumes.push(krb.volume(ctx));
        }
        if wants_local_storage(cfg) {
            let dir = layer.warehouse_dir.clone().unwrap_or_else(|| DEFAULT_WAREHOUSE_DIR.to_string());
            mounts.push(VolumeMount { name: DATA_VOLUME.into(), mount_path: dir, ..Default::default() });
            volumes.push(Volume {
                name: DATA_VOLUME.into(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        let container = Container {
            name: CONTAINER_NAME.into(),
            image: Some(image.reference()),
            image_pull_policy: Some(image.pull_policy().to_string()),
            env_from: Some(vec![EnvFromSource {
                secret_ref: Some(SecretEnvSource { name: Some(name.clone()), ..Default::default() }),
                ..Default::default()
            }]),
            env: (!env.is_empty()).then_some(env),
            ports: Some(vec![ContainerPort {
                name: Some(THRIFT_PORT_NAME.into()),
                container_port: THRIFT_PORT,
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            resources: resources(ctx)?,
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::String(THRIFT_PORT_NAME.into()),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(10),
                period_seconds: Some(10),
                ..Default::default()
            }),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        let deployment = Deployment {
            metadata: ctx.metadata()?,
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector { match_labels: Some(ctx.selector()), ..Default::default() },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(ctx.labels()), ..Default::default() }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(volumes),
                        affinity: layer.affinity.clone(),
                        node_selector: layer.node_selector.clone(),
                        tolerations: layer.tolerations.clone(),
                        termination_grace_period_seconds: cfg.graceful_shutdown().map(|d| d.as_secs() as i64),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        Ok(Some(to_dynamic(&deployment)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{instance, resolved};
    use strata_core::layer::{CpuLayer, KerberosLayer, MemoryLayer, ResourcesLayer, S3Layer};
    use strata_core::{ClusterOperation, ConfigLayer};

    fn build(hms: &strata_core::HiveMetastore, layer: ConfigLayer) -> Result<DynamicObject, BuildError> {
        let cfg = resolved(layer);
        DeploymentBuilder.build(&BuildContext::new(hms, "default", &cfg)).map(|o| o.unwrap())
    }

    #[test]
    fn quantities() {
        for ok in ["1", "250m", "1.5", "2Gi", "512Mi", "1e3", "10G"] {
            assert!(is_quantity(ok), "{ok}");
        }
        for bad in ["", "Gi", "two", "1GB", "1.2.3"] {
            assert!(!is_quantity(bad), "{bad}");
        }
    }

    #[test]
    fn workload_shape() {
        let hms = instance();
        let obj = build(&hms, ConfigLayer { replicas: Some(3), graceful_shutdown_timeout: Some("2m".into()), ..Default::default() }).unwrap();
        let spec = &obj.data["spec"];
        assert_eq!(spec["replicas"], 3);
        assert_eq!(spec["selector"]["matchLabels"]["strata.dev/role-group"], "default");
        let pod = &spec["template"]["spec"];
        assert_eq!(pod["terminationGracePeriodSeconds"], 120);
        let c = &pod["containers"][0];
        assert_eq!(c["name"], CONTAINER_NAME);
        assert_eq!(c["image"], "apache/hive:4.0.0");
        assert_eq!(c["ports"][0]["containerPort"], THRIFT_PORT);
        assert_eq!(c["envFrom"][0]["secretRef"]["name"], "hms-metastore-default");
        assert_eq!(c["readinessProbe"]["tcpSocket"]["port"], THRIFT_PORT_NAME);
        let vols: Vec<&str> = pod["volumes"].as_array().unwrap().iter().map(|v| v["name"].as_str().unwrap()).collect();
        assert_eq!(vols, vec!["config", "data"]);
    }

    #[test]
    fn every_config_file_is_mounted() {
        let hms = instance();
        let obj = build(
            &hms,
            ConfigLayer {
                config_overrides: Some(BTreeMap::from([(
                    "core-site.xml".to_string(),
                    BTreeMap::from([("fs.defaultFS".to_string(), "s3a://wh".to_string())]),
                )])),
                s3: Some(S3Layer::default()),
                ..Default::default()
            },
        )
        .unwrap();
        let mounts = obj.data["spec"]["template"]["spec"]["containers"][0]["volumeMounts"].as_array().unwrap().clone();
        let paths: Vec<&str> = mounts.iter().map(|m| m["mountPath"].as_str().unwrap()).collect();
        assert_eq!(paths, vec![
            "/opt/hive/conf/core-site.xml",
            "/opt/hive/conf/hive-site.xml",
            "/opt/hive/conf/metastore-log4j2.properties",
        ]);
        assert!(mounts.iter().all(|m| m["name"] == CONFIG_VOLUME));
        assert_eq!(mounts[0]["subPath"], "core-site.xml");
    }

    #[test]
    fn kerberos_mounts_keytab_volume_and_sets_env() {
        let hms = instance();
        let obj = build(
            &hms,
            ConfigLayer {
                kerberos: Some(KerberosLayer { secret_class: Some("kerberos".into()), realm: Some("EXAMPLE.COM".into()) }),
                env_overrides: Some(BTreeMap::from([("HADOOP_OPTS".to_string(), "-Xmx2g".to_string())])),
                s3: Some(S3Layer::default()),
                ..Default::default()
            },
        )
        .unwrap();
        let pod = &obj.data["spec"]["template"]["spec"];
        let vols: Vec<&str> = pod["volumes"].as_array().unwrap().iter().map(|v| v["name"].as_str().unwrap()).collect();
        assert_eq!(vols, vec!["config", "kerberos"]);
        let c = &pod["containers"][0];
        let mounts = c["volumeMounts"].as_array().unwrap();
        assert!(mounts.iter().any(|m| m["mountPath"] == "/kubedoop/kerberos"));
        assert!(mounts.iter().any(|m| m["subPath"] == "core-site.xml"));
        let env = c["env"].as_array().unwrap();
        assert!(env.iter().any(|e| e["name"] == "KRB5_CONFIG" && e["value"] == "/kubedoop/kerberos/krb5.conf"));
        let opts: Vec<&serde_json::Value> = env.iter().filter(|e| e["name"] == "HADOOP_OPTS").collect();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0]["value"], "-Xmx2g");
    }

    #[test]
    fn stopped_instance_scales_to_zero() {
        let mut hms = instance();
        hms.spec.cluster_operation = Some(ClusterOperation { stopped: true, ..Default::default() });
        let obj = build(&hms, ConfigLayer { replicas: Some(3), ..Default::default() }).unwrap();
        assert_eq!(obj.data["spec"]["replicas"], 0);
    }

    #[test]
    fn s3_groups_mount_no_data_volume() {
        let hms = instance();
        let obj = build(&hms, ConfigLayer { s3: Some(S3Layer::default()), ..Default::default() }).unwrap();
        let vols = obj.data["spec"]["template"]["spec"]["volumes"].as_array().unwrap();
        assert_eq!(vols.len(), 1);
    }

    #[test]
    fn resources_and_env_overrides() {
        let hms = instance();
        let obj = build(
            &hms,
            ConfigLayer {
                resources: Some(ResourcesLayer {
                    cpu: Some(CpuLayer { min: Some("250m".into()), max: Some("1".into()) }),
                    memory: Some(MemoryLayer { limit: Some("2Gi".into()) }),
                    storage: None,
                }),
                env_overrides: Some(BTreeMap::from([("HIVE_OPTS".to_string(), "-v".to_string())])),
                ..Default::default()
            },
        )
        .unwrap();
        let c = &obj.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(c["resources"]["requests"]["cpu"], "250m");
        assert_eq!(c["resources"]["limits"]["cpu"], "1");
        assert_eq!(c["resources"]["limits"]["memory"], "2Gi");
        assert_eq!(c["env"][0]["name"], "HIVE_OPTS");
    }

    #[test]
    fn invalid_quantity_is_a_build_error() {
        let hms = instance();
        let err = build(
            &hms,
            ConfigLayer {
                resources: Some(ResourcesLayer {
                    memory: Some(MemoryLayer { limit: Some("lots".into()) }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Invalid { .. }));
    }
}
