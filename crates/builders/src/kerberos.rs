use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EnvVar, EphemeralVolumeSource, PersistentVolumeClaimSpec, PersistentVolumeClaimTemplate, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use strata_core::BuildError;

use crate::BuildContext;

pub const CORE_SITE: &str = "core-site.xml";
pub const KERBEROS_DIR: &str = "/kubedoop/kerberos";

const VOLUME: &str = "kerberos";
const SERVICE_NAME: &str = "metastore";
const SECRET_STORAGE_CLASS: &str = "secrets.kubedoop.dev";
const ANNOTATION_CLASS: &str = "secrets.kubedoop.dev/class";
const ANNOTATION_SCOPE: &str = "secrets.kubedoop.dev/scope";
const ANNOTATION_SERVICE_NAMES: &str = "secrets.kubedoop.dev/kerberosServiceNames";

/// Validated Kerberos settings for one role group.
pub(crate) struct Kerberos<'a> {
    secret_class: &'a str,
    realm: &'a str,
}

/// `None` when the role group runs without Kerberos.
pub(crate) fn settings<'a>(ctx: &BuildContext<'a>) -> Result<Option<Kerberos<'a>>, BuildError> {
    let Some(krb) = ctx.config.kerberos() else {
        return Ok(None);
    };
    match (krb.secret_class.as_deref(), krb.realm.as_deref()) {
        (Some(secret_class), Some(realm)) if !secret_class.is_empty() && !realm.is_empty() => {
            Ok(Some(Kerberos { secret_class, realm }))
        }
        _ => Err(ctx.invalid("kerberos needs both secretClass and realm")),
    }
}

impl Kerberos<'_> {
    /// `metastore/<service>.<namespace>.svc.cluster.local@<REALM>`
    pub fn principal(&self, ctx: &BuildContext<'_>) -> String {
        let ns = ctx.instance.metadata.namespace.as_deref().unwrap_or_default();
        format!("{}/{}.{}.svc.cluster.local@{}", SERVICE_NAME, ctx.name(), ns, self.realm)
    }

    pub fn hive_site(&self, ctx: &BuildContext<'_>) -> BTreeMap<String, String> {
        let principal = self.principal(ctx);
        BTreeMap::from([
            ("hive.metastore.sasl.enabled".to_string(), "true".to_string()),
            ("hive.metastore.kerberos.principal".to_string(), principal.clone()),
            ("hive.metastore.client.kerberos.principal".to_string(), principal),
            ("hive.metastore.kerberos.keytab.file".to_string(), format!("{}/keytab", KERBEROS_DIR)),
        ])
    }

    pub fn core_site(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("hadoop.security.authentication".to_string(), "kerberos".to_string())])
    }

    pub fn env(&self) -> Vec<EnvVar> {
        vec![
            EnvVar { name: "KRB5_CONFIG".into(), value: Some(format!("{}/krb5.conf", KERBEROS_DIR)), ..Default::default() },
            EnvVar {
                name: "HADOOP_OPTS".into(),
                value: Some(format!("-Djava.security.krb5.conf={}/krb5.conf", KERBEROS_DIR)),
                ..Default::default()
            },
        ]
    }

    /// Ephemeral volume the secret operator fills with the keytab and krb5.conf.
    pub fn volume(&self, ctx: &BuildContext<'_>) -> Volume {
        let annotations = BTreeMap::from([
            (ANNOTATION_CLASS.to_string(), self.secret_class.to_string()),
            (ANNOTATION_SCOPE.to_string(), format!("service={}", ctx.name())),
            (ANNOTATION_SERVICE_NAMES.to_string(), format!("{},HTTP", SERVICE_NAME)),
        ]);
        let mut spec = PersistentVolumeClaimSpec {
            storage_class_name: Some(SECRET_STORAGE_CLASS.into()),
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(Default::default()),
            ..Default::default()
        };
        if let Some(res) = spec.resources.as_mut() {
            res.requests = Some(BTreeMap::from([("storage".to_string(), Quantity("1Mi".into()))]));
        }
        Volume {
            name: VOLUME.into(),
            ephemeral: Some(EphemeralVolumeSource {
                volume_claim_template: Some(PersistentVolumeClaimTemplate {
                    metadata: Some(ObjectMeta { annotations: Some(annotations), ..Default::default() }),
                    spec,
                }),
            }),
            ..Default::default()
        }
    }

    pub fn mount(&self) -> VolumeMount {
        VolumeMount { name: VOLUME.into(), mount_path: KERBEROS_DIR.into(), ..Default::default() }
    }
}
