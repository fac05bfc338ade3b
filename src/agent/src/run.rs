//! One node run: snapshot, resolve, plan, remove.

use crate::error::Result;
use crate::events::EventSink;
use crate::exclusion::ExclusionSet;
use crate::inventory::{InventorySnapshot, RuntimeInventory, DEFAULT_CALL_TIMEOUT};
use crate::matcher::plan;
use crate::remover::{ImageRemover, RemovalReport};
use crate::resolver::resolve;
use crate::targets::TargetSpec;
use prune_core::{ImageRecord, StatsReporter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Inputs for a single removal pass on one node
pub struct NodeRun {
    pub node_name: String,
    pub targets: TargetSpec,
    pub exclusions: ExclusionSet,
    /// Bound for each inventory query and each delete call
    pub timeout: Duration,
    pub events: Option<Arc<dyn EventSink>>,
}

impl NodeRun {
    pub fn new(node_name: impl Into<String>, targets: TargetSpec) -> Self {
        Self {
            node_name: node_name.into(),
            targets,
            exclusions: ExclusionSet::default(),
            timeout: DEFAULT_CALL_TIMEOUT,
            events: None,
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }
}

/// Target the digests a collector handed over
pub fn targets_from_records(records: &[ImageRecord]) -> TargetSpec {
    TargetSpec::new(records.iter().map(|r| r.digest.clone()))
}

/// Run the removal pipeline once against `inventory`
pub async fn run_removal(
    inventory: Arc<dyn RuntimeInventory>,
    stats: Arc<dyn StatsReporter>,
    run: NodeRun,
) -> Result<RemovalReport> {
    tracing::info!(
        "[Run] Node {}: {} targets, {} exclusion patterns",
        run.node_name,
        run.targets.len(),
        run.exclusions.len()
    );

    let snapshot = InventorySnapshot::capture(inventory.as_ref(), run.timeout).await?;
    let resolved = resolve(&snapshot);
    let deletion_plan = plan(&run.targets, &resolved, &run.exclusions, &HashSet::new());

    tracing::debug!(
        "[Run] Planned {} deletions out of {} entries",
        deletion_plan.pending().count(),
        deletion_plan.entries.len()
    );

    let mut remover = ImageRemover::new(inventory, stats).with_timeout(run.timeout);
    if let Some(sink) = run.events {
        remover = remover.with_events(sink, run.node_name.clone());
    }

    Ok(remover.remove(deletion_plan, &resolved).await)
}
