//! prune-operator: standalone orchestrator.
//!
//! Hosts the cluster state in memory, drives the well-known DesiredState from
//! an image list file, executes remover pods on the local node and serves
//! metrics until Ctrl-C.

use anyhow::{bail, Context};
use clap::Parser;
use prune_agent::{CrictlInventory, RuntimeInventory, RuntimeKind, TracingEventSink};
use prune_core::config::{self, v1alpha3};
use prune_core::{ConfigMap, MetricsRegistry, Node, PruneConfig, StatsReporter};
use prune_operator::metrics_server;
use prune_operator::template::EXCLUSION_LABEL;
use prune_operator::{
    ClusterClient, Controller, InMemoryCluster, JobOrchestrator, PodExecutor, SystemClock,
    DESIRED_STATE_NAME,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "prune-operator", version, about = "Orchestrate image pruning across nodes")]
struct Args {
    /// Manager configuration (prune.dev/v1alpha2 or v1alpha3). Defaults apply when omitted.
    #[arg(long, env = "PRUNE_CONFIG")]
    config: Option<PathBuf>,

    /// YAML document with an `images` list, re-read every poll interval
    #[arg(long)]
    imagelist_file: PathBuf,

    #[arg(long, default_value_t = 10)]
    poll_secs: u64,

    /// Name of the local node
    #[arg(long, env = "NODE_NAME", default_value = "local-node")]
    node_name: String,

    /// Label on the local node, as key=value (repeatable)
    #[arg(long = "node-label", value_parser = parse_label)]
    node_labels: Vec<(String, String)>,

    /// Exclusion list file (repeatable); one pattern per line or a JSON array
    #[arg(long = "exclusion-list")]
    exclusion_lists: Vec<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:8889")]
    metrics_addr: SocketAddr,

    #[arg(long, default_value = "prune-system")]
    namespace: String,

    /// Overrides the configured log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Emit one event per removed image
    #[arg(long)]
    emit_removal_event: bool,
}

#[derive(Debug, Deserialize)]
struct ImageListFile {
    #[serde(default)]
    images: Vec<String>,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let prune_config = match &args.config {
        Some(path) => match config::load_config(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => PruneConfig::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| prune_config.log_level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run(args, prune_config).await {
        tracing::error!("[Operator] {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args, prune_config: PruneConfig) -> anyhow::Result<()> {
    report_unused_settings(&prune_config);

    let registry = Arc::new(MetricsRegistry::new());
    let stats: Arc<dyn StatsReporter> = registry.clone();

    let cluster = Arc::new(InMemoryCluster::new(args.namespace.clone()));
    let mut node = Node::new(args.node_name.clone());
    for (key, value) in &args.node_labels {
        node = node.with_label(key, value);
    }
    cluster.add_node(node);

    for path in &args.exclusion_lists {
        register_exclusion_list(cluster.as_ref(), path).await?;
    }

    let images = read_image_list(&args.imagelist_file)?;
    cluster.apply_desired_state(DESIRED_STATE_NAME, images);

    let runtime: RuntimeKind = prune_config.runtime.parse()?;
    let inventory: Arc<dyn RuntimeInventory> = Arc::new(CrictlInventory::new(&runtime));
    tracing::info!("[Operator] Runtime endpoint {}", runtime.endpoint());

    let debug_config = if prune_config.profile.enabled {
        let doc: v1alpha3::ManagerConfig = prune_config.clone().into();
        Some(serde_yaml::to_string(&doc)?)
    } else {
        None
    };

    let cluster_client: Arc<dyn ClusterClient> = cluster.clone();
    let orchestrator = Arc::new(
        JobOrchestrator::new(
            Arc::clone(&cluster_client),
            Arc::new(SystemClock),
            Arc::clone(&stats),
            prune_config,
        )
        .with_namespace(args.namespace.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut executor = PodExecutor::new(
        Arc::clone(&cluster_client),
        inventory,
        Arc::clone(&stats),
        args.node_name.clone(),
    );
    if args.emit_removal_event {
        executor = executor.with_events(Arc::new(TracingEventSink));
    }
    let executor_task = tokio::spawn(executor.run(shutdown_rx.clone()));

    let controller = Controller::new(Arc::clone(&cluster_client), orchestrator);
    let controller_task = tokio::spawn(controller.run(shutdown_rx.clone()));

    let router = metrics_server::build_router(Arc::clone(&registry), debug_config);
    let metrics_task = tokio::spawn(metrics_server::serve(
        args.metrics_addr,
        router,
        shutdown_rx.clone(),
    ));

    let poll_task = tokio::spawn(poll_image_list(
        Arc::clone(&cluster),
        args.imagelist_file.clone(),
        Duration::from_secs(args.poll_secs.max(1)),
        shutdown_rx,
    ));

    tracing::info!("[Operator] Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;

    tracing::info!("[Operator] Shutting down");
    let _ = shutdown_tx.send(true);

    for joined in futures::future::join_all([poll_task, controller_task, executor_task]).await {
        if let Err(e) = joined {
            tracing::warn!("[Operator] Task ended abnormally: {}", e);
        }
    }
    match metrics_task.await {
        Ok(Err(e)) => tracing::warn!("[Operator] Metrics server: {}", e),
        Err(e) => tracing::warn!("[Operator] Metrics task: {}", e),
        Ok(Ok(())) => {}
    }

    registry.flush();
    Ok(())
}

/// Settings that are parsed and carried but have no effect in this process
fn report_unused_settings(config: &PruneConfig) {
    if config.components.scanner.enabled {
        tracing::warn!("[Operator] Vulnerability scanning is not supported; scanner settings are ignored");
    }
    if config.components.collector.enabled {
        tracing::warn!(
            "[Operator] Scheduled collection is not supported; use --imagelist-file with \"*\" instead"
        );
    }
    if !config.otlp_endpoint.is_empty() {
        tracing::warn!(
            "[Operator] OTLP export to {} is not supported; metrics are served on /metrics",
            config.otlp_endpoint
        );
    }
}

fn read_image_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading image list {}", path.display()))?;
    let doc: ImageListFile = serde_yaml::from_str(&content)
        .with_context(|| format!("parsing image list {}", path.display()))?;
    Ok(doc.images)
}

async fn register_exclusion_list(cluster: &InMemoryCluster, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading exclusion list {}", path.display()))?;
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
        bail!("exclusion list path {} has no file name", path.display());
    };

    let mut labels = BTreeMap::new();
    labels.insert(EXCLUSION_LABEL.to_string(), "true".to_string());
    let mut data = BTreeMap::new();
    data.insert("excluded".to_string(), content);

    cluster
        .create_config_map(ConfigMap {
            name: stem.clone(),
            labels,
            data,
            ..Default::default()
        })
        .await?;
    tracing::info!("[Operator] Registered exclusion list {}", stem);
    Ok(())
}

async fn poll_image_list(
    cluster: Arc<InMemoryCluster>,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match read_image_list(&path) {
                    Ok(images) => {
                        cluster.apply_desired_state(DESIRED_STATE_NAME, images);
                    }
                    Err(e) => tracing::warn!("[Operator] {:#}", e),
                }
            }
        }
    }
}
