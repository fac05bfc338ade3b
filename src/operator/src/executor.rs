//! Runs remover pods scheduled on one node.
//!
//! Stands in for the node's kubelet when the operator runs outside a real
//! cluster: every `Pending` pod bound to the node is moved to `Running`, its
//! mounted ConfigMaps are read the way the remover container would see them,
//! the removal pipeline runs against the node's runtime and the pod ends up
//! `Succeeded` or `Failed`.

use crate::cluster::{ClusterClient, ClusterEvent};
use crate::error::{ReconcileError, Result};
use crate::template::{EXCLUSION_MOUNT, TARGETS_KEY, TARGETS_MOUNT};
use prune_agent::exclusion::parse_patterns;
use prune_agent::{
    run_removal, EventSink, ExclusionSet, NodeRun, RemovalReport, RuntimeInventory, TargetSpec,
};
use prune_core::{Pod, PodPhase, PodTemplate, StatsReporter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

pub struct PodExecutor {
    cluster: Arc<dyn ClusterClient>,
    inventory: Arc<dyn RuntimeInventory>,
    stats: Arc<dyn StatsReporter>,
    node_name: String,
    timeout: Duration,
    events: Option<Arc<dyn EventSink>>,
}

impl PodExecutor {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        inventory: Arc<dyn RuntimeInventory>,
        stats: Arc<dyn StatsReporter>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            inventory,
            stats,
            node_name: node_name.into(),
            timeout: prune_agent::inventory::DEFAULT_CALL_TIMEOUT,
            events: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Execute pods bound to this node until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.cluster.subscribe();
        tracing::info!("[Executor] Watching pods for node {}", self.node_name);

        self.run_pending().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(ClusterEvent::PodChanged { pod }) if self.is_runnable(&pod) => {
                            self.execute_logged(pod).await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => self.run_pending().await,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        tracing::info!("[Executor] Stopped on node {}", self.node_name);
    }

    fn is_runnable(&self, pod: &Pod) -> bool {
        pod.node_name == self.node_name && pod.phase == PodPhase::Pending
    }

    async fn run_pending(&self) {
        let pods = match self.cluster.list_pods().await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!("[Executor] Failed to list pods: {}", e);
                return;
            }
        };

        for pod in pods.into_iter().filter(|p| self.is_runnable(p)) {
            self.execute_logged(pod).await;
        }
    }

    async fn execute_logged(&self, pod: Pod) {
        let name = pod.name.clone();
        if let Err(e) = self.execute(pod).await {
            tracing::warn!("[Executor] Pod {} could not be executed: {}", name, e);
        }
    }

    /// Run one pod to completion and record its final phase
    pub async fn execute(&self, pod: Pod) -> Result<PodPhase> {
        let mut running = pod;
        running.phase = PodPhase::Running;
        let running = self.cluster.update_pod(&running).await?;

        tracing::info!("[Executor] Running pod {} on {}", running.name, self.node_name);

        let phase = match self.run_agent(&running.template).await {
            Ok(report) if report.success => {
                tracing::info!(
                    "[Executor] Pod {} removed {} images",
                    running.name,
                    report.manifest.len()
                );
                PodPhase::Succeeded
            }
            Ok(report) => {
                tracing::warn!(
                    "[Executor] Pod {} failed: wildcard removal incomplete ({} removed)",
                    running.name,
                    report.manifest.len()
                );
                PodPhase::Failed
            }
            Err(e) => {
                tracing::warn!("[Executor] Pod {} failed: {}", running.name, e);
                PodPhase::Failed
            }
        };

        let mut finished = running;
        finished.phase = phase;
        self.cluster.update_pod(&finished).await?;
        Ok(phase)
    }

    async fn run_agent(&self, template: &PodTemplate) -> Result<RemovalReport> {
        let targets = self.load_targets(template).await?;
        let exclusions = self.load_exclusions(template).await?;

        let mut node_run = NodeRun::new(self.node_name.clone(), targets)
            .with_exclusions(exclusions)
            .with_timeout(self.timeout);
        if let Some(sink) = &self.events {
            node_run = node_run.with_events(Arc::clone(sink));
        }

        Ok(run_removal(Arc::clone(&self.inventory), Arc::clone(&self.stats), node_run).await?)
    }

    async fn load_targets(&self, template: &PodTemplate) -> Result<TargetSpec> {
        let mount = template
            .mounts
            .iter()
            .find(|m| m.mount_path == TARGETS_MOUNT)
            .ok_or_else(|| ReconcileError::NotFound("target list mount".to_string()))?;

        let config_map = self
            .cluster
            .get_config_map(&mount.config_map)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("ConfigMap {}", mount.config_map)))?;

        let content = config_map.data.get(TARGETS_KEY).ok_or_else(|| {
            ReconcileError::NotFound(format!("key {} in {}", TARGETS_KEY, mount.config_map))
        })?;
        Ok(TargetSpec::parse(content)?)
    }

    /// Missing exclusion ConfigMaps count as empty, like an absent mount
    async fn load_exclusions(&self, template: &PodTemplate) -> Result<ExclusionSet> {
        let mut patterns = Vec::new();
        for mount in template
            .mounts
            .iter()
            .filter(|m| m.mount_path.starts_with(EXCLUSION_MOUNT))
        {
            let Some(config_map) = self.cluster.get_config_map(&mount.config_map).await? else {
                tracing::debug!("[Executor] Exclusion list {} is gone", mount.config_map);
                continue;
            };
            for content in config_map.data.values() {
                patterns.extend(parse_patterns(content)?);
            }
        }
        Ok(ExclusionSet::new(patterns)?)
    }
}
