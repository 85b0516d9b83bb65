//! Strata resolve: merges the cluster / role / role-group / override config layers
//! into one resolved configuration per role group.

#![forbid(unsafe_code)]

mod merge;

use std::time::Duration;

use serde::Serialize;
use strata_core::layer::{ConfigLayer, DatabaseLayer, KerberosLayer, S3Layer};
use strata_core::HiveMetastoreSpec;
use tracing::warn;

pub use merge::Merge;

pub const DEFAULT_REPLICAS: i32 = 1;
pub const DEFAULT_SERVICE_PORT: i32 = 9083;
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Fully merged configuration for one role group. Owns all of its values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig(ConfigLayer);

impl ResolvedConfig {
    pub fn layer(&self) -> &ConfigLayer { &self.0 }

    pub fn into_layer(self) -> ConfigLayer { self.0 }

    pub fn replicas(&self) -> i32 { self.0.replicas.unwrap_or(DEFAULT_REPLICAS) }

    pub fn service_port(&self) -> i32 {
        self.0.service.as_ref().and_then(|s| s.port).unwrap_or(DEFAULT_SERVICE_PORT)
    }

    pub fn service_type(&self) -> &str {
        self.0.service.as_ref().and_then(|s| s.service_type.as_deref()).unwrap_or(DEFAULT_SERVICE_TYPE)
    }

    /// Parsed `gracefulShutdownTimeout`; unparsable values are logged and ignored.
    pub fn graceful_shutdown(&self) -> Option<Duration> {
        let raw = self.0.graceful_shutdown_timeout.as_deref()?;
        match humantime::parse_duration(raw) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(value = %raw, error = %e, "resolve: ignoring unparsable gracefulShutdownTimeout");
                None
            }
        }
    }

    pub fn console_log_level(&self) -> &str {
        self.0.logging.as_ref().and_then(|l| l.console.as_ref()).and_then(|c| c.level.as_deref()).unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn file_log_level(&self) -> &str {
        self.0.logging.as_ref().and_then(|l| l.file.as_ref()).and_then(|c| c.level.as_deref()).unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn database(&self) -> Option<&DatabaseLayer> { self.0.database.as_ref() }

    pub fn s3(&self) -> Option<&S3Layer> { self.0.s3.as_ref() }

    pub fn kerberos(&self) -> Option<&KerberosLayer> { self.0.kerberos.as_ref() }

    pub fn pdb_enabled(&self) -> bool {
        self.0.pod_disruption_budget.as_ref().and_then(|p| p.enabled).unwrap_or(true)
    }
}

/// Resolved configuration tagged with its role group name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleGroupConfig {
    pub name: String,
    pub config: ResolvedConfig,
}

/// Merge up to four layers, most specific winning per field.
///
/// Pure: inputs are only read, and the result holds clones of whatever it
/// took from them.
pub fn resolve(
    cluster: Option<&ConfigLayer>,
    role: Option<&ConfigLayer>,
    role_group: Option<&ConfigLayer>,
    overrides: Option<&ConfigLayer>,
) -> ResolvedConfig {
    let mut out = ConfigLayer::default();
    for layer in [overrides, role_group, role, cluster].into_iter().flatten() {
        out.merge(layer);
    }
    ResolvedConfig(out)
}

/// Resolve every role group of an instance, in role-group name order.
pub fn resolve_role_groups(spec: &HiveMetastoreSpec) -> Vec<RoleGroupConfig> {
    spec.role_groups
        .iter()
        .map(|(name, group)| {
            // the role group's own `replicas` field counts as part of its layer
            let group_layer = match (group.config.as_ref(), group.replicas) {
                (None, None) => None,
                (config, replicas) => {
                    let mut layer = config.cloned().unwrap_or_default();
                    if replicas.is_some() {
                        layer.replicas = replicas;
                    }
                    Some(layer)
                }
            };
            let config = resolve(
                spec.cluster_config.as_ref(),
                spec.role_config.as_ref(),
                group_layer.as_ref(),
                group.overrides.as_ref(),
            );
            RoleGroupConfig { name: name.clone(), config }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_core::layer::{CpuLayer, LogLevel, LoggingLayer, MemoryLayer, ResourcesLayer, ServiceLayer};
    use strata_core::RoleGroupSpec;

    fn replicas(n: i32) -> ConfigLayer {
        ConfigLayer { replicas: Some(n), ..Default::default() }
    }

    #[test]
    fn override_replicas_beat_cluster_replicas() {
        let cluster = replicas(1);
        let ov = replicas(3);
        let r = resolve(Some(&cluster), None, None, Some(&ov));
        assert_eq!(r.replicas(), 3);
    }

    #[test]
    fn cluster_only_timeout_reaches_every_role_group() {
        let spec = HiveMetastoreSpec {
            cluster_config: Some(ConfigLayer { graceful_shutdown_timeout: Some("30s".into()), ..Default::default() }),
            role_groups: BTreeMap::from([
                ("a".to_string(), RoleGroupSpec::default()),
                ("b".to_string(), RoleGroupSpec { replicas: Some(2), ..Default::default() }),
            ]),
            ..Default::default()
        };
        let groups = resolve_role_groups(&spec);
        assert_eq!(groups.len(), 2);
        for g in &groups {
            assert_eq!(g.config.layer().graceful_shutdown_timeout.as_deref(), Some("30s"));
            assert_eq!(g.config.graceful_shutdown(), Some(Duration::from_secs(30)));
        }
        assert_eq!(groups[0].name, "a");
        assert_eq!(groups[0].config.replicas(), DEFAULT_REPLICAS);
        assert_eq!(groups[1].config.replicas(), 2);
    }

    #[test]
    fn resolve_is_deterministic_and_leaves_inputs_alone() {
        let cluster = ConfigLayer {
            node_selector: Some(BTreeMap::from([("zone".into(), "a".into())])),
            ..replicas(1)
        };
        let role = ConfigLayer { warehouse_dir: Some("/wh".into()), ..Default::default() };
        let before = cluster.clone();
        let r1 = resolve(Some(&cluster), Some(&role), None, None);
        let r2 = resolve(Some(&cluster), Some(&role), None, None);
        assert_eq!(r1, r2);
        assert_eq!(cluster, before);
    }

    #[test]
    fn nested_records_merge_field_by_field() {
        let cluster = ConfigLayer {
            resources: Some(ResourcesLayer {
                cpu: Some(CpuLayer { min: Some("100m".into()), max: Some("1".into()) }),
                memory: Some(MemoryLayer { limit: Some("1Gi".into()) }),
                storage: None,
            }),
            ..Default::default()
        };
        let role = ConfigLayer {
            resources: Some(ResourcesLayer {
                cpu: Some(CpuLayer { min: None, max: Some("2".into()) }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let r = resolve(Some(&cluster), Some(&role), None, None);
        let res = r.layer().resources.as_ref().unwrap();
        let cpu = res.cpu.as_ref().unwrap();
        assert_eq!(cpu.max.as_deref(), Some("2"));
        assert_eq!(cpu.min.as_deref(), Some("100m"));
        assert_eq!(res.memory.as_ref().unwrap().limit.as_deref(), Some("1Gi"));
    }

    #[test]
    fn lists_are_replaced_not_concatenated() {
        use k8s_openapi::api::core::v1::Toleration;
        let tol = |key: &str| Toleration { key: Some(key.into()), ..Default::default() };
        let cluster = ConfigLayer { tolerations: Some(vec![tol("a"), tol("b")]), ..Default::default() };
        let group = ConfigLayer { tolerations: Some(vec![tol("c")]), ..Default::default() };
        let r = resolve(Some(&cluster), None, Some(&group), None);
        let keys: Vec<_> = r.layer().tolerations.as_ref().unwrap().iter().map(|t| t.key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["c"]);
    }

    #[test]
    fn maps_merge_by_key_at_every_level() {
        let cluster = ConfigLayer {
            config_overrides: Some(BTreeMap::from([(
                "hive-site.xml".to_string(),
                BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "1".to_string())]),
            )])),
            env_overrides: Some(BTreeMap::from([("X".to_string(), "cluster".to_string())])),
            ..Default::default()
        };
        let ov = ConfigLayer {
            config_overrides: Some(BTreeMap::from([
                ("hive-site.xml".to_string(), BTreeMap::from([("b".to_string(), "2".to_string())])),
                ("core-site.xml".to_string(), BTreeMap::from([("c".to_string(), "3".to_string())])),
            ])),
            env_overrides: Some(BTreeMap::from([("Y".to_string(), "override".to_string())])),
            ..Default::default()
        };
        let r = resolve(Some(&cluster), None, None, Some(&ov));
        let files = r.layer().config_overrides.as_ref().unwrap();
        assert_eq!(files["hive-site.xml"]["a"], "1");
        assert_eq!(files["hive-site.xml"]["b"], "2");
        assert_eq!(files["core-site.xml"]["c"], "3");
        let env = r.layer().env_overrides.as_ref().unwrap();
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn absent_layers_give_defaults() {
        let r = resolve(None, None, None, None);
        assert_eq!(r, ResolvedConfig::default());
        assert_eq!(r.replicas(), 1);
        assert_eq!(r.service_port(), DEFAULT_SERVICE_PORT);
        assert_eq!(r.service_type(), "ClusterIP");
        assert_eq!(r.console_log_level(), "INFO");
        assert!(r.graceful_shutdown().is_none());
        assert!(r.pdb_enabled());
    }

    #[test]
    fn logging_and_service_layers_overlay() {
        let cluster = ConfigLayer {
            logging: Some(LoggingLayer {
                console: Some(LogLevel { level: Some("WARN".into()) }),
                loggers: Some(BTreeMap::from([("org.apache.hadoop".to_string(), LogLevel { level: Some("ERROR".into()) })])),
                ..Default::default()
            }),
            service: Some(ServiceLayer { service_type: Some("NodePort".into()), port: Some(9083), annotations: None }),
            ..Default::default()
        };
        let group = ConfigLayer {
            logging: Some(LoggingLayer {
                file: Some(LogLevel { level: Some("DEBUG".into()) }),
                loggers: Some(BTreeMap::from([("metastore".to_string(), LogLevel { level: Some("DEBUG".into()) })])),
                ..Default::default()
            }),
            service: Some(ServiceLayer { port: Some(19083), ..Default::default() }),
            ..Default::default()
        };
        let r = resolve(Some(&cluster), None, Some(&group), None);
        assert_eq!(r.console_log_level(), "WARN");
        assert_eq!(r.file_log_level(), "DEBUG");
        assert_eq!(r.layer().logging.as_ref().unwrap().loggers.as_ref().unwrap().len(), 2);
        assert_eq!(r.service_type(), "NodePort");
        assert_eq!(r.service_port(), 19083);
    }

    #[test]
    fn role_group_replicas_win_over_its_config_layer() {
        let spec = HiveMetastoreSpec {
            role_config: Some(replicas(4)),
            role_groups: BTreeMap::from([(
                "default".to_string(),
                RoleGroupSpec { replicas: Some(2), config: Some(replicas(5)), overrides: None },
            )]),
            ..Default::default()
        };
        assert_eq!(resolve_role_groups(&spec)[0].config.replicas(), 2);
    }

    #[test]
    fn disruption_bounds_from_different_layers_do_not_combine() {
        use strata_core::layer::PdbLayer;
        let cluster = ConfigLayer {
            pod_disruption_budget: Some(PdbLayer { min_available: Some(1), ..Default::default() }),
            ..Default::default()
        };
        let group = ConfigLayer {
            pod_disruption_budget: Some(PdbLayer { max_unavailable: Some(2), ..Default::default() }),
            ..Default::default()
        };
        let r = resolve(Some(&cluster), None, Some(&group), None);
        let pdb = r.layer().pod_disruption_budget.clone().unwrap();
        assert_eq!(pdb.min_available, None);
        assert_eq!(pdb.max_unavailable, Some(2));
        assert!(r.pdb_enabled());
    }

    #[test]
    fn kerberos_fields_merge_per_field() {
        let cluster = ConfigLayer {
            kerberos: Some(KerberosLayer { secret_class: Some("kerberos".into()), realm: Some("CLUSTER.COM".into()) }),
            ..Default::default()
        };
        let group = ConfigLayer {
            kerberos: Some(KerberosLayer { realm: Some("GROUP.COM".into()), ..Default::default() }),
            ..Default::default()
        };
        let r = resolve(Some(&cluster), None, Some(&group), None);
        let krb = r.kerberos().unwrap();
        assert_eq!(krb.secret_class.as_deref(), Some("kerberos"));
        assert_eq!(krb.realm.as_deref(), Some("GROUP.COM"));
        assert!(resolve(None, None, Some(&replicas(1)), None).kerberos().is_none());
    }
}
