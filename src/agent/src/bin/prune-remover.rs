//! prune-remover: node-local image removal agent.
//!
//! `remove` deletes the images named in a target list (or handed over by a
//! collector), honouring exclusions. `collect` lists non-running images for a
//! remover and waits for it to finish.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prune_agent::{
    collect_non_running, run_removal, targets_from_records, AgentError, CrictlInventory,
    ExclusionSet, Handshake, NodeRun, RuntimeInventory, RuntimeKind, TargetSpec,
    TracingEventSink,
};
use prune_core::MetricsRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "prune-remover", version, about = "Remove unused container images from this node")]
struct Args {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Container runtime: containerd, cri-o, docker, or a unix:// socket address
    #[arg(long, env = "PRUNE_RUNTIME", default_value = "containerd", global = true)]
    runtime: String,

    /// Bound for each runtime call and handshake step
    #[arg(long, default_value_t = 300, global = true)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove target images
    Remove {
        /// Target list: JSON array or one token per line
        #[arg(long, conflicts_with = "handshake_dir")]
        imagelist: Option<PathBuf>,

        /// Take targets from a collector through this handshake directory
        #[arg(long)]
        handshake_dir: Option<PathBuf>,

        /// Directory of mounted exclusion lists
        #[arg(long, default_value = "/run/prune/excluded")]
        exclusion_dir: PathBuf,

        #[arg(long, env = "NODE_NAME", default_value = "")]
        node_name: String,

        /// Emit one event per removed image
        #[arg(long)]
        emit_removal_event: bool,
    },
    /// List non-running images and hand them to a remover
    Collect {
        #[arg(long)]
        handshake_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run(args).await {
        match e.downcast_ref::<AgentError>() {
            Some(AgentError::Corruption(_)) => {
                tracing::error!("[Remover] Fatal handshake error: {:#}", e)
            }
            _ => tracing::error!("[Remover] {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let runtime: RuntimeKind = args.runtime.parse()?;
    let timeout = Duration::from_secs(args.timeout_secs);
    let inventory: Arc<dyn RuntimeInventory> =
        Arc::new(CrictlInventory::new(&runtime).with_timeout(timeout));

    tracing::info!("[Remover] Using runtime endpoint {}", runtime.endpoint());

    match args.command {
        Command::Remove {
            imagelist,
            handshake_dir,
            exclusion_dir,
            node_name,
            emit_removal_event,
        } => {
            let handshake = handshake_dir.map(|dir| Handshake::new(dir, timeout));
            let targets = match (&imagelist, &handshake) {
                (Some(path), _) => TargetSpec::load(path)?,
                (None, Some(handshake)) => {
                    handshake.prepare()?;
                    targets_from_records(&handshake.receive_images().await?)
                }
                (None, None) => bail!("either --imagelist or --handshake-dir is required"),
            };

            let exclusions = ExclusionSet::load_dir(&exclusion_dir)
                .with_context(|| format!("loading exclusions from {}", exclusion_dir.display()))?;

            let mut node_run = NodeRun::new(node_name, targets)
                .with_exclusions(exclusions)
                .with_timeout(timeout);
            if emit_removal_event {
                node_run = node_run.with_events(Arc::new(TracingEventSink));
            }

            let metrics = Arc::new(MetricsRegistry::new());
            let report = run_removal(inventory, metrics.clone(), node_run).await?;
            metrics.flush();

            if let Some(handshake) = handshake {
                handshake.finish_erase().await?;
            }

            if !report.success {
                bail!("one or more wildcard removals failed");
            }
            Ok(())
        }
        Command::Collect { handshake_dir } => {
            let handshake = Handshake::new(handshake_dir, timeout);
            handshake.prepare()?;

            let images = collect_non_running(inventory.as_ref(), timeout).await?;
            handshake.publish_images(&images).await?;
            handshake.await_erase().await?;

            tracing::info!("[Collector] Remover finished, exiting");
            Ok(())
        }
    }
}
