use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::DynamicObject;
use strata_core::layer::DatabaseLayer;
use strata_core::{BuildError, ObjectKind};

use crate::{to_dynamic, BuildContext, ObjectBuilder};

/// Environment bundle: database connection options and S3 credentials.
pub struct SecretBuilder;

/// `SERVICE_OPTS` for the metastore JVM; anything but mysql/postgres runs on embedded derby.
pub fn service_opts(db: Option<&DatabaseLayer>) -> (String, String) {
    let driver = db.and_then(|d| d.driver.as_deref()).unwrap_or("derby");
    let host = db.and_then(|d| d.host.as_deref()).unwrap_or_default();
    let dbname = db.and_then(|d| d.database_name.as_deref()).unwrap_or("metastore_db");
    let user = db.and_then(|d| d.username.as_deref()).unwrap_or_default();
    let password = db.and_then(|d| d.password.as_deref()).unwrap_or_default();
    let (driver, class, url) = match driver {
        "mysql" => {
            let port = db.and_then(|d| d.port).unwrap_or(3306);
            ("mysql", "com.mysql.cj.jdbc.Driver", format!("jdbc:mysql://{}:{}/{}", host, port, dbname))
        }
        "postgres" => {
            let port = db.and_then(|d| d.port).unwrap_or(5432);
            ("postgres", "org.postgresql.Driver", format!("jdbc:postgresql://{}:{}/{}", host, port, dbname))
        }
        _ => ("derby", "org.apache.derby.jdbc.EmbeddedDriver", format!("jdbc:derby:{};create=true", dbname)),
    };
    let opts = format!(
        "-Xmx1G -Djavax.jdo.option.ConnectionDriverName={} -Djavax.jdo.option.ConnectionURL={} -Djavax.jdo.option.ConnectionUserName={} -Djavax.jdo.option.ConnectionPassword={}",
        class, url, user, password
    );
    (driver.to_string(), opts)
}

impl ObjectBuilder for SecretBuilder {
    fn kind(&self) -> ObjectKind { ObjectKind::Secret }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Option<DynamicObject>, BuildError> {
        let db = ctx.config.database();
        if let Some(d) = db {
            let networked = matches!(d.driver.as_deref(), Some("mysql" | "postgres"));
            if networked && d.host.is_none() {
                return Err(ctx.invalid(format!(
                    "database driver {} needs a host in role-group-config, role-config or cluster-config",
                    d.driver.as_deref().unwrap_or_default()
                )));
            }
        }
        let (driver, opts) = service_opts(db);
        let mut data = BTreeMap::new();
        data.insert("DB_DRIVER".to_string(), ByteString(driver.into_bytes()));
        data.insert("SERVICE_NAME".to_string(), ByteString(b"metastore".to_vec()));
        data.insert("SERVICE_OPTS".to_string(), ByteString(opts.into_bytes()));

        if let Some(s3) = ctx.config.s3() {
            let (Some(access), Some(secret)) = (s3.access_key.as_deref(), s3.secret_key.as_deref()) else {
                return Err(ctx.invalid("s3 connection needs accessKey and secretKey"));
            };
            data.insert("AWS_ACCESS_KEY_ID".to_string(), ByteString(access.as_bytes().to_vec()));
            data.insert("AWS_SECRET_ACCESS_KEY".to_string(), ByteString(secret.as_bytes().to_vec()));
            if let Some(region) = s3.region.as_deref() {
                data.insert("AWS_DEFAULT_REGION".to_string(), ByteString(region.as_bytes().to_vec()));
            }
        }

        let secret = Secret {
            metadata: ctx.metadata()?,
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Default::default()
        };
        Ok(Some(to_dynamic(&secret)?))
    }
}
