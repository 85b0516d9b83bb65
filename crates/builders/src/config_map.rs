use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::DynamicObject;
use strata_core::{BuildError, ObjectKind};
use strata_resolve::ResolvedConfig;

use crate::kerberos::{self, CORE_SITE};
use crate::{to_dynamic, warehouse_on_s3, BuildContext, ObjectBuilder};

pub const HIVE_SITE: &str = "hive-site.xml";
pub const LOG4J2_PROPERTIES: &str = "metastore-log4j2.properties";
pub const DEFAULT_WAREHOUSE_DIR: &str = "/opt/hive/data/warehouse";

const CONSOLE_PATTERN: &str = "%d{ISO8601} %5p [%t] %c{2}: %m%n";
const LOG_DIR: &str = "/opt/hive/logs";

/// hive-site.xml and the log4j2 properties, core-site.xml under Kerberos,
/// plus any extra override files: `*.xml` as Hadoop configuration, the rest
/// as `key=value` lines.
pub struct ConfigMapBuilder;

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn hive_site_properties(ctx: &BuildContext<'_>) -> Result<BTreeMap<String, String>, BuildError> {
    let cfg = ctx.config;
    let layer = cfg.layer();
    let mut props = BTreeMap::new();
    let warehouse = layer.warehouse_dir.clone().unwrap_or_else(|| DEFAULT_WAREHOUSE_DIR.to_string());
    props.insert("hive.metastore.warehouse.dir".to_string(), warehouse);
    props.insert("metastore.thrift.port".to_string(), crate::THRIFT_PORT.to_string());
    if let Some(s3) = cfg.s3() {
        props.insert("fs.s3a.impl".into(), "org.apache.hadoop.fs.s3a.S3AFileSystem".into());
        props.insert("fs.s3a.aws.credentials.provider".into(), "com.amazonaws.auth.EnvironmentVariableCredentialsProvider".into());
        if let Some(endpoint) = &s3.endpoint {
            props.insert("fs.s3a.endpoint".into(), endpoint.clone());
        }
        if let Some(bucket) = &s3.bucket {
            props.insert("fs.s3a.bucket".into(), bucket.clone());
        }
        props.insert("fs.s3a.path.style.access".into(), s3.path_style_access.unwrap_or(false).to_string());
        props.insert("fs.s3a.connection.ssl.enabled".into(), s3.ssl_enabled.unwrap_or(false).to_string());
        props.insert("fs.s3a.connection.maximum".into(), s3.max_connections.unwrap_or(96).to_string());
    }
    if let Some(krb) = kerberos::settings(ctx)? {
        props.extend(krb.hive_site(ctx));
    }
    props.extend(overrides(cfg, HIVE_SITE));
    Ok(props)
}

fn overrides<'a>(cfg: &'a ResolvedConfig, file: &str) -> impl Iterator<Item = (String, String)> + 'a {
    let props = cfg.layer().config_overrides.as_ref().and_then(|o| o.get(file));
    props.into_iter().flatten().map(|(k, v)| (k.clone(), v.clone()))
}

/// Hadoop `<configuration>` document, one `<property>` per entry.
pub fn render_xml_properties(props: &BTreeMap<String, String>) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n<?xml-stylesheet type=\"text/xsl\" href=\"configuration.xsl\"?>\n<configuration>\n",
    );
    for (name, value) in props {
        let _ = write!(
            out,
            "  <property>\n    <name>{}</name>\n    <value>{}</value>\n  </property>\n",
            xml_escape(name),
            xml_escape(value)
        );
    }
    out.push_str("</configuration>\n");
    out
}

pub fn render_hive_site(ctx: &BuildContext<'_>) -> Result<String, BuildError> {
    Ok(render_xml_properties(&hive_site_properties(ctx)?))
}

/// Every file the role group's ConfigMap carries, which is also every file
/// the workload mounts into its config directory.
pub fn config_files(cfg: &ResolvedConfig) -> BTreeSet<String> {
    let mut files = BTreeSet::from([HIVE_SITE.to_string(), LOG4J2_PROPERTIES.to_string()]);
    if cfg.kerberos().is_some() {
        files.insert(CORE_SITE.to_string());
    }
    files.extend(cfg.layer().config_overrides.iter().flatten().map(|(file, _)| file.clone()));
    files
}

pub fn render_log4j2(cfg: &ResolvedConfig) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "appenders = FILE, CONSOLE\n\n\
         appender.CONSOLE.type = Console\n\
         appender.CONSOLE.name = CONSOLE\n\
         appender.CONSOLE.target = SYSTEM_ERR\n\
         appender.CONSOLE.layout.type = PatternLayout\n\
         appender.CONSOLE.layout.pattern = {pattern}\n\
         appender.CONSOLE.filter.threshold.type = ThresholdFilter\n\
         appender.CONSOLE.filter.threshold.level = {console}\n\n\
         appender.FILE.type = RollingFile\n\
         appender.FILE.name = FILE\n\
         appender.FILE.fileName = {dir}/metastore.log4j2.xml\n\
         appender.FILE.filePattern = {dir}/metastore.log4j2.xml.%i\n\
         appender.FILE.layout.type = XMLLayout\n\
         appender.FILE.policies.type = Policies\n\
         appender.FILE.policies.size.type = SizeBasedTriggeringPolicy\n\
         appender.FILE.policies.size.size = 5MB\n\
         appender.FILE.strategy.type = DefaultRolloverStrategy\n\
         appender.FILE.strategy.max = 1\n\
         appender.FILE.filter.threshold.type = ThresholdFilter\n\
         appender.FILE.filter.threshold.level = {file}\n",
        pattern = CONSOLE_PATTERN,
        console = cfg.console_log_level(),
        file = cfg.file_log_level(),
        dir = LOG_DIR,
    );
    let loggers = cfg.layer().logging.as_ref().and_then(|l| l.loggers.as_ref());
    if let Some(loggers) = loggers.filter(|l| !l.is_empty()) {
        let names: Vec<&str> = loggers.keys().map(String::as_str).collect();
        let _ = write!(out, "\nloggers = {}\n", names.join(", "));
        for (name, level) in loggers {
            let _ = write!(
                out,
                "logger.{name}.name = {name}\nlogger.{name}.level = {}\n",
                level.level.as_deref().unwrap_or(strata_resolve::DEFAULT_LOG_LEVEL)
            );
        }
    }
    out.push_str(
        "\nrootLogger.level = INFO\n\
         rootLogger.appenderRefs = CONSOLE, FILE\n\
         rootLogger.appenderRef.CONSOLE.ref = CONSOLE\n\
         rootLogger.appenderRef.FILE.ref = FILE\n",
    );
    if let Some(extra) = cfg.layer().config_overrides.as_ref().and_then(|o| o.get(LOG4J2_PROPERTIES)) {
        for (k, v) in extra {
            let _ = writeln!(out, "{} = {}", k, v);
        }
    }
    out
}

impl ObjectBuilder for ConfigMapBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::ConfigMap }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        let layer = ctx.config.layer();
        if let Some(dir) = layer.warehouse_dir.as_deref() {
            if warehouse_on_s3(dir) && ctx.config.s3().is_none() {
                return Err(ctx.invalid(format!("warehouse dir {} is on S3 but no s3 connection is configured", dir)));
            }
        }
        let krb = kerberos::settings(ctx)?;
        let mut data = BTreeMap::new();
        for file in config_files(ctx.config) {
            let body = match file.as_str() {
                HIVE_SITE => render_hive_site(ctx)?,
                LOG4J2_PROPERTIES => render_log4j2(ctx.config),
                CORE_SITE => {
                    let mut props: BTreeMap<String, String> = krb.iter().flat_map(|k| k.core_site()).collect();
                    props.extend(overrides(ctx.config, CORE_SITE));
                    render_xml_properties(&props)
                }
                f if f.ends_with(".xml") => render_xml_properties(&overrides(ctx.config, f).collect()),
                f => overrides(ctx.config, f).fold(String::new(), |mut acc, (k, v)| {
                    let _ = writeln!(acc, "{}={}", k, v);
                    acc
                }),
            };
            data.insert(file, body);
        }
        let cm = ConfigMap { metadata: ctx.metadata()?, data: Some(data), ..Default::default() };
        Ok(Some(to_dynamic(&cm)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{instance, resolved};
    use strata_core::layer::{KerberosLayer, LogLevel, LoggingLayer, S3Layer};
    use strata_core::ConfigLayer;

    fn hive_site(layer: ConfigLayer) -> String {
        let hms = instance();
        let cfg = resolved(layer);
        render_hive_site(&BuildContext::new(&hms, "default", &cfg)).unwrap()
    }

    fn data(layer: ConfigLayer) -> serde_json::Value {
        let hms = instance();
        let cfg = resolved(layer);
        let obj = ConfigMapBuilder.build(&BuildContext::new(&hms, "default", &cfg)).unwrap().unwrap();
        obj.data["data"].clone()
    }

    #[test]
    fn hive_site_has_warehouse_and_overrides() {
        let xml = hive_site(ConfigLayer {
            warehouse_dir: Some("/data/wh".into()),
            config_overrides: Some(BTreeMap::from([(
                HIVE_SITE.to_string(),
                BTreeMap::from([("hive.metastore.event.db.notification.api.auth".to_string(), "false".to_string())]),
            )])),
            ..Default::default()
        });
        assert!(xml.contains("<name>hive.metastore.warehouse.dir</name>\n    <value>/data/wh</value>"));
        assert!(xml.contains("hive.metastore.event.db.notification.api.auth"));
        assert!(!xml.contains("fs.s3a"));
    }

    #[test]
    fn s3_settings_render_when_configured() {
        let xml = hive_site(ConfigLayer {
            s3: Some(S3Layer { endpoint: Some("http://minio:9000".into()), path_style_access: Some(true), ..Default::default() }),
            ..Default::default()
        });
        assert!(xml.contains("<value>http://minio:9000</value>"));
        assert!(xml.contains("<name>fs.s3a.path.style.access</name>\n    <value>true</value>"));
    }

    #[test]
    fn log4j2_uses_levels_and_loggers() {
        let cfg = resolved(ConfigLayer {
            logging: Some(LoggingLayer {
                console: Some(LogLevel { level: Some("WARN".into()) }),
                loggers: Some(BTreeMap::from([("org.apache.hive".to_string(), LogLevel { level: Some("DEBUG".into()) })])),
                ..Default::default()
            }),
            ..Default::default()
        });
        let props = render_log4j2(&cfg);
        assert!(props.contains("appender.CONSOLE.filter.threshold.level = WARN"));
        assert!(props.contains("appender.FILE.filter.threshold.level = INFO"));
        assert!(props.contains("loggers = org.apache.hive"));
        assert!(props.contains("logger.org.apache.hive.level = DEBUG"));
    }

    #[test]
    fn s3_warehouse_without_connection_is_rejected() {
        let hms = instance();
        let cfg = resolved(ConfigLayer { warehouse_dir: Some("s3://bucket/wh".into()), ..Default::default() });
        let err = ConfigMapBuilder.build(&BuildContext::new(&hms, "default", &cfg)).unwrap_err();
        assert!(err.to_string().contains("no s3 connection"));
    }

    #[test]
    fn extra_override_files_render_by_extension() {
        let d = data(ConfigLayer {
            config_overrides: Some(BTreeMap::from([
                ("core-site.xml".to_string(), BTreeMap::from([("fs.defaultFS".to_string(), "s3a://wh".to_string())])),
                ("security.properties".to_string(), BTreeMap::from([("a".to_string(), "1".to_string())])),
            ])),
            ..Default::default()
        });
        assert_eq!(d["security.properties"], "a=1\n");
        let core = d["core-site.xml"].as_str().unwrap();
        assert!(core.starts_with("<?xml"));
        assert!(core.contains("<name>fs.defaultFS</name>\n    <value>s3a://wh</value>"));
        assert!(d[HIVE_SITE].as_str().unwrap().starts_with("<?xml"));
    }

    #[test]
    fn kerberos_adds_sasl_properties_and_core_site() {
        let d = data(ConfigLayer {
            kerberos: Some(KerberosLayer { secret_class: Some("kerberos".into()), realm: Some("EXAMPLE.COM".into()) }),
            config_overrides: Some(BTreeMap::from([(
                CORE_SITE.to_string(),
                BTreeMap::from([("hadoop.rpc.protection".to_string(), "privacy".to_string())]),
            )])),
            ..Default::default()
        });
        let site = d[HIVE_SITE].as_str().unwrap();
        assert!(site.contains("<name>hive.metastore.sasl.enabled</name>\n    <value>true</value>"));
        assert!(site.contains("metastore/hms-metastore-default.data.svc.cluster.local@EXAMPLE.COM"));
        let core = d[CORE_SITE].as_str().unwrap();
        assert!(core.contains("<name>hadoop.security.authentication</name>\n    <value>kerberos</value>"));
        assert!(core.contains("hadoop.rpc.protection"));
    }

    #[test]
    fn config_files_match_configmap_keys() {
        let layer = ConfigLayer {
            kerberos: Some(KerberosLayer { secret_class: Some("k".into()), realm: Some("R".into()) }),
            config_overrides: Some(BTreeMap::from([("hdfs-site.xml".to_string(), BTreeMap::new())])),
            ..Default::default()
        };
        let keys: BTreeSet<String> = data(layer.clone()).as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, config_files(&resolved(layer)));
        assert_eq!(keys.len(), 4);
    }
}
