//! Reconcile logic for DesiredState and WorkItem objects.
//!
//! A DesiredState moves through
//! `NoActiveWork -> WorkRunning -> WorkTerminal -> PendingDeletion -> removed`:
//!
//! - no owned WorkItem and an unobserved generation: submit one WorkItem
//! - one non-terminal WorkItem: requeue and wait
//! - a terminal WorkItem seen for the first time: copy its counters onto the
//!   DesiredState, record metrics and stamp `delete_after`
//! - past `delete_after`: remove the WorkItem together with its pods and
//!   ConfigMaps
//!
//! A WorkItem fans out one pod per eligible node while `Pending` and settles
//! on `Completed` or `Failed` once every pod has finished.
//!
//! Every step reads fresh state from the cluster, so reconciles can be
//! repeated at any point. Writes carry the version that was read and fail
//! with [`ReconcileError::Conflict`] when stale.

use crate::clock::Clock;
use crate::cluster::ClusterClient;
use crate::error::{ReconcileError, Result};
use crate::node_filter::NodeFilterPolicy;
use crate::template::{self, DESIRED_STATE_NAME, EXCLUSION_LABEL};
use chrono::{DateTime, Utc};
use prune_core::{
    DesiredState, DesiredStateStatus, Phase, PodPhase, PruneConfig, StatsReporter, WorkItem,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Delay before looking at a running WorkItem again
pub const RUNNING_REQUEUE: Duration = Duration::from_secs(60);

/// Object a reconcile is keyed on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileRequest {
    DesiredState(String),
    WorkItem(String),
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileRequest::DesiredState(name) => write!(f, "{}/{}", DesiredState::KIND, name),
            ReconcileRequest::WorkItem(name) => write!(f, "{}/{}", WorkItem::KIND, name),
        }
    }
}

/// What the controller should do after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

pub struct JobOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    clock: Arc<dyn Clock>,
    stats: Arc<dyn StatsReporter>,
    config: PruneConfig,
    namespace: String,
    node_filter: NodeFilterPolicy,
    /// When the most recent WorkItem was submitted
    start_time: Mutex<Option<DateTime<Utc>>>,
}

impl JobOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        clock: Arc<dyn Clock>,
        stats: Arc<dyn StatsReporter>,
        config: PruneConfig,
    ) -> Self {
        let node_filter = NodeFilterPolicy::new(&config.node_filter);
        Self {
            cluster,
            clock,
            stats,
            config,
            namespace: "prune-system".to_string(),
            node_filter,
            start_time: Mutex::new(None),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn config(&self) -> &PruneConfig {
        &self.config
    }

    /// Reconcile the well-known DesiredState once at start-up
    pub async fn bootstrap(&self) -> Result<Action> {
        tracing::info!("[Orchestrator] Initial sync of {}", DESIRED_STATE_NAME);
        self.reconcile_desired_state(DESIRED_STATE_NAME).await
    }

    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Action> {
        match request {
            ReconcileRequest::DesiredState(name) => self.reconcile_desired_state(name).await,
            ReconcileRequest::WorkItem(name) => self.reconcile_work_item(name).await,
        }
    }

    pub async fn reconcile_desired_state(&self, name: &str) -> Result<Action> {
        if name != DESIRED_STATE_NAME {
            tracing::debug!("[Orchestrator] Ignoring DesiredState {}", name);
            return Ok(Action::done());
        }

        let Some(desired) = self.cluster.get_desired_state(name).await? else {
            tracing::debug!("[Orchestrator] DesiredState {} does not exist", name);
            return Ok(Action::done());
        };

        let owner = desired.controller_ref();
        let mut owned: Vec<WorkItem> = self
            .cluster
            .list_work_items()
            .await?
            .into_iter()
            .filter(|item| item.is_controlled_by(&owner))
            .collect();

        match owned.len() {
            0 => {
                if desired.status.observed_generation == Some(desired.generation) {
                    return Ok(Action::done());
                }
                self.submit(desired).await
            }
            1 => {
                let item = owned.remove(0);
                self.handle_owned(desired, item).await
            }
            n => {
                let names: Vec<&str> = owned.iter().map(|i| i.name.as_str()).collect();
                Err(ReconcileError::Consistency(format!(
                    "{} WorkItems owned by DesiredState {}: {}",
                    n,
                    desired.name,
                    names.join(", ")
                )))
            }
        }
    }

    /// Create the target list and the WorkItem for the current generation
    async fn submit(&self, mut desired: DesiredState) -> Result<Action> {
        let exclusions = self.cluster.list_config_maps(EXCLUSION_LABEL, "true").await?;

        let targets = self
            .cluster
            .create_config_map(template::targets_config_map(&self.namespace, &desired)?)
            .await?;

        let pod_template = template::remover_template(&self.config, &targets, &exclusions);
        let item = self
            .cluster
            .create_work_item(template::work_item(&desired, pod_template))
            .await?;

        tracing::info!(
            "[Orchestrator] Submitted {} for generation {} ({} images, {} exclusion lists)",
            item.name,
            desired.generation,
            desired.spec.images.len(),
            exclusions.len()
        );

        let mut targets = targets;
        targets.owner = Some(item.controller_ref());
        self.cluster.update_config_map(&targets).await?;

        desired.status.observed_generation = Some(desired.generation);
        self.cluster.update_desired_state_status(&desired).await?;

        self.set_start_time(self.clock.now());
        Ok(Action::done())
    }

    async fn handle_owned(&self, desired: DesiredState, item: WorkItem) -> Result<Action> {
        if !item.status.phase.is_terminal() {
            tracing::debug!(
                "[Orchestrator] {} is {}, checking again in {:?}",
                item.name,
                item.status.phase,
                RUNNING_REQUEUE
            );
            return Ok(Action::requeue(RUNNING_REQUEUE));
        }

        let (desired, item) = match item.status.delete_after {
            Some(_) => (desired, item),
            None => self.finish(desired, item).await?,
        };

        let Some(delete_after) = item.status.delete_after else {
            return Ok(Action::done());
        };

        let now = self.clock.now();
        if now >= delete_after {
            self.cleanup(&desired, &item).await?;
            // spec changed while the item was running
            if desired.status.observed_generation != Some(desired.generation) {
                return self.submit(desired).await;
            }
            return Ok(Action::done());
        }

        let remaining = (delete_after - now).to_std().unwrap_or_default();
        tracing::debug!(
            "[Orchestrator] {} is kept until {} ({:?} left)",
            item.name,
            delete_after,
            remaining
        );
        Ok(Action::requeue(remaining))
    }

    /// First observation of a terminal WorkItem
    async fn finish(
        &self,
        mut desired: DesiredState,
        mut item: WorkItem,
    ) -> Result<(DesiredState, WorkItem)> {
        let now = self.clock.now();

        desired.status = DesiredStateStatus {
            success: i64::from(item.status.succeeded),
            failed: i64::from(item.status.failed),
            skipped: i64::from(item.status.skipped),
            timestamp: Some(now),
            observed_generation: Some(item.spec.desired_generation),
        };
        let desired = self.cluster.update_desired_state_status(&desired).await?;

        let cleanup = &self.config.image_job.cleanup;
        let delay = match item.status.phase {
            Phase::Completed => cleanup.delay_on_success,
            _ => cleanup.delay_on_failure,
        };
        let delete_after = now.checked_add_signed(delay.as_chrono()).unwrap_or_else(|| {
            tracing::warn!(
                "[Orchestrator] Removal delay {} for {} is past the end of time, keeping it",
                delay,
                item.name
            );
            DateTime::<Utc>::MAX_UTC
        });
        item.status.delete_after = Some(delete_after);
        let item = self.cluster.update_work_item_status(&item).await?;

        let started = self.start_time().or(item.created_at).unwrap_or(now);
        let duration = (now - started).to_std().unwrap_or_default();
        self.stats.record_job(item.status.phase, duration);
        self.stats
            .record_pods_completed(u64::from(item.status.succeeded));
        self.stats.record_pods_failed(u64::from(item.status.failed));

        tracing::info!(
            phase = %item.status.phase,
            succeeded = item.status.succeeded,
            failed = item.status.failed,
            skipped = item.status.skipped,
            "[Orchestrator] {} finished after {:?}, removal after {}",
            item.name,
            duration,
            delay
        );

        Ok((desired, item))
    }

    async fn cleanup(&self, desired: &DesiredState, item: &WorkItem) -> Result<()> {
        let owner = item.controller_ref();
        for pod in self.cluster.list_pods().await? {
            if template::is_owned_by(&pod, &owner) {
                ignore_not_found(self.cluster.delete_pod(&pod.name).await)?;
            }
        }

        // target lists whose hand-over to a WorkItem never completed stay owned by the DesiredState
        let mut config_maps = self.cluster.list_owned_config_maps(&item.uid).await?;
        config_maps.extend(self.cluster.list_owned_config_maps(&desired.uid).await?);
        for cm in config_maps {
            ignore_not_found(self.cluster.delete_config_map(&cm.name).await)?;
        }

        ignore_not_found(self.cluster.delete_work_item(&item.name).await)?;
        tracing::info!("[Orchestrator] Removed {}", item.name);
        Ok(())
    }

    pub async fn reconcile_work_item(&self, name: &str) -> Result<Action> {
        let Some(item) = self.cluster.get_work_item(name).await? else {
            return Ok(Action::done());
        };

        match item.status.phase {
            Phase::Pending => self.fan_out(item).await,
            Phase::Running => self.evaluate(item).await,
            Phase::Completed | Phase::Failed => Ok(Action::done()),
        }
    }

    /// One pod per eligible node
    async fn fan_out(&self, mut item: WorkItem) -> Result<Action> {
        let nodes = self.cluster.list_nodes().await?;
        let (eligible, skipped) = self.node_filter.partition(nodes);

        let owner = item.controller_ref();
        let existing: HashSet<String> = self
            .cluster
            .list_pods()
            .await?
            .into_iter()
            .filter(|pod| template::is_owned_by(pod, &owner))
            .map(|pod| pod.name)
            .collect();

        let mut created = 0usize;
        for node in &eligible {
            let pod = template::pod_for_node(&item, node);
            if existing.contains(&pod.name) {
                continue;
            }
            match self.cluster.create_pod(pod).await {
                Ok(_) => created += 1,
                Err(ReconcileError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            "[Orchestrator] {} fanned out to {} nodes ({} new pods, {} skipped)",
            item.name,
            eligible.len(),
            created,
            skipped.len()
        );

        item.status.desired = eligible.len() as u32;
        item.status.skipped = skipped.len() as u32;
        item.status.phase = Phase::Running;
        let item = self.cluster.update_work_item_status(&item).await?;

        self.evaluate(item).await
    }

    /// Settle the phase once every pod has finished
    async fn evaluate(&self, mut item: WorkItem) -> Result<Action> {
        let owner = item.controller_ref();
        let pods: Vec<_> = self
            .cluster
            .list_pods()
            .await?
            .into_iter()
            .filter(|pod| template::is_owned_by(pod, &owner))
            .collect();

        let succeeded = pods
            .iter()
            .filter(|p| p.phase == PodPhase::Succeeded)
            .count() as u32;
        let failed = pods.iter().filter(|p| p.phase == PodPhase::Failed).count() as u32;
        let finished = succeeded + failed >= item.status.desired;

        if !finished {
            if item.status.succeeded != succeeded || item.status.failed != failed {
                item.status.succeeded = succeeded;
                item.status.failed = failed;
                self.cluster.update_work_item_status(&item).await?;
            }
            return Ok(Action::done());
        }

        item.status.succeeded = succeeded;
        item.status.failed = failed;
        item.status.phase = if item.status.success_fraction() >= self.config.image_job.success_ratio
        {
            Phase::Completed
        } else {
            Phase::Failed
        };

        tracing::info!(
            "[Orchestrator] {} {}: {}/{} pods succeeded (ratio {})",
            item.name,
            item.status.phase,
            succeeded,
            item.status.desired,
            self.config.image_job.success_ratio
        );
        self.cluster.update_work_item_status(&item).await?;
        Ok(Action::done())
    }

    fn start_time(&self) -> Option<DateTime<Utc>> {
        match self.start_time.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_start_time(&self, at: DateTime<Utc>) {
        match self.start_time.lock() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
