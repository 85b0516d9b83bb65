use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::{CustomResourceExt, ResourceExt};
use serde::Serialize;
use strata_apply::KindRegistry;
use strata_core::{HiveMetastore, InstanceKey, ObjectKind};
use strata_engine::{Engine, EngineConfig};
use strata_kubehub::{KubeStore, MemStore};
use tracing::{error, info, info_span, warn};

#[derive(Parser, Debug)]
#[command(name = "stratactl", version, about = "HiveMetastore operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Restrict to one namespace (default: all)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against the current cluster
    Run {
        #[arg(long, env = "STRATA_WORKERS")]
        workers: Option<usize>,
        #[arg(long = "resync-secs", env = "STRATA_RESYNC_SECS")]
        resync_secs: Option<u64>,
    },
    /// One reconcile pass for `namespace/name` against the cluster
    Reconcile { key: String },
    /// Print the resolved configuration of every role group in a manifest
    Resolve { file: String },
    /// Print the objects a manifest would produce (in-memory dry run)
    Render { file: String },
    /// Print the HiveMetastore CustomResourceDefinition
    Crd,
}

fn init_tracing() {
    let env = std::env::var("STRATA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STRATA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid STRATA_METRICS_ADDR; expected host:port");
        }
    }
}

fn print<T: Serialize>(output: Output, value: &T) -> Result<()> {
    match output {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn read_manifest(path: &str) -> Result<HiveMetastore> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let mut hms: HiveMetastore = serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path))?;
    hms.metadata.namespace.get_or_insert_with(|| "default".to_string());
    Ok(hms)
}

async fn render(hms: HiveMetastore) -> Result<Vec<serde_json::Value>> {
    let store = MemStore::new();
    let hms = store.insert_instance(hms).await;
    let key = InstanceKey::new(hms.namespace().unwrap_or_default(), hms.name_any());
    let config = EngineConfig { workload_ready_gate: false, ..EngineConfig::from_env() };
    let engine = Engine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(KindRegistry::standard()),
        strata_builders::standard_builders(),
        &config,
        info_span!("render"),
    );
    engine.reconcile(&key).await?;
    let mut out = Vec::new();
    for kind in ObjectKind::ALL {
        for obj in store.objects(kind).await {
            out.push(serde_json::to_value(&obj)?);
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { workers, resync_secs } => {
            init_metrics();
            let mut config = EngineConfig::from_env();
            if let Some(w) = workers {
                config.workers = w;
            }
            if let Some(s) = resync_secs {
                config.resync = Duration::from_secs(s);
            }
            let client = strata_kubehub::client().await?;
            let store = Arc::new(KubeStore::new(client.clone()));
            let engine = Arc::new(Engine::new(
                store.clone(),
                store.clone(),
                Arc::new(KindRegistry::standard()),
                strata_builders::standard_builders(),
                &config,
                info_span!("engine"),
            ));
            info!(ns = ?cli.namespace, "run invoked");
            strata_engine::controller::run(client, engine, store, config, cli.namespace).await?;
        }
        Commands::Reconcile { key } => {
            let key = InstanceKey::from_str(&key).map_err(anyhow::Error::msg)?;
            let config = EngineConfig::from_env();
            let client = strata_kubehub::client().await?;
            let store = Arc::new(KubeStore::new(client));
            let engine = Engine::new(
                store.clone(),
                store,
                Arc::new(KindRegistry::standard()),
                strata_builders::standard_builders(),
                &config,
                info_span!("engine"),
            );
            match engine.reconcile(&key).await {
                Ok(Some(after)) => println!("{}: requeue after {}s", key, after.as_secs()),
                Ok(None) => println!("{}: reconciled", key),
                Err(e) => {
                    error!(key = %key, error = %e, "reconcile failed");
                    return Err(e.into());
                }
            }
        }
        Commands::Resolve { file } => {
            let hms = read_manifest(&file)?;
            let groups = strata_resolve::resolve_role_groups(&hms.spec);
            print(cli.output, &groups)?;
        }
        Commands::Render { file } => {
            let hms = read_manifest(&file)?;
            let objects = render(hms).await?;
            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&objects)?),
                Output::Yaml => {
                    for obj in &objects {
                        print!("---\n{}", serde_yaml::to_string(obj)?);
                    }
                }
            }
        }
        Commands::Crd => print(cli.output, &HiveMetastore::crd())?,
    }
    Ok(())
}
