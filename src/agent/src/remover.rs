//! Applies a deletion plan against the runtime.

use crate::events::EventSink;
use crate::inventory::{with_timeout, RuntimeInventory, DEFAULT_CALL_TIMEOUT};
use crate::matcher::{DeletionOutcome, DeletionPlan, PlanEntry};
use crate::resolver::ResolvedSets;
use prune_core::{ImageRecord, StatsReporter};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Result of one removal batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemovalReport {
    /// Plan entries with their final outcomes, in plan order
    pub entries: Vec<PlanEntry>,
    /// Images actually removed
    pub manifest: Vec<ImageRecord>,
    /// False if any digest covered by the wildcard is still present after a
    /// failed deletion, whichever token attempted it first
    pub success: bool,
}

impl RemovalReport {
    pub fn count(&self, outcome: DeletionOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Deletes planned images, remembering what it removed for the rest of the run
pub struct ImageRemover {
    inventory: Arc<dyn RuntimeInventory>,
    stats: Arc<dyn StatsReporter>,
    events: Option<Arc<dyn EventSink>>,
    node_name: String,
    timeout: Duration,
    deleted: HashSet<String>,
}

impl ImageRemover {
    pub fn new(inventory: Arc<dyn RuntimeInventory>, stats: Arc<dyn StatsReporter>) -> Self {
        Self {
            inventory,
            stats,
            events: None,
            node_name: String::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
            deleted: HashSet::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Emit one event per removed image, tagged with `node_name`
    pub fn with_events(mut self, sink: Arc<dyn EventSink>, node_name: impl Into<String>) -> Self {
        self.events = Some(sink);
        self.node_name = node_name.into();
        self
    }

    /// Digests removed so far in this run
    pub fn deleted(&self) -> &HashSet<String> {
        &self.deleted
    }

    /// Execute every pending entry of `plan`. Failures are recorded per entry
    /// and never stop the batch. A pending digest is only reported as already
    /// deleted once a deletion of it has succeeded; after a failure the next
    /// entry for the same digest tries again.
    pub async fn remove(&mut self, plan: DeletionPlan, resolved: &ResolvedSets) -> RemovalReport {
        let mut report = RemovalReport {
            success: true,
            ..Default::default()
        };

        for mut entry in plan.entries {
            if entry.outcome != DeletionOutcome::Pending {
                if entry.outcome == DeletionOutcome::StillRunning {
                    tracing::info!("[Remover] {} is still running, skipping", entry.token);
                }
                report.entries.push(entry);
                continue;
            }

            let Some(digest) = entry.digest.clone() else {
                entry.outcome = DeletionOutcome::NotFound;
                report.entries.push(entry);
                continue;
            };

            if self.deleted.contains(&digest) {
                entry.outcome = DeletionOutcome::AlreadyDeletedThisRun;
                report.entries.push(entry);
                continue;
            }

            let record = resolved.record(&digest);
            match with_timeout(self.timeout, "delete image", self.inventory.delete_image(&digest))
                .await
            {
                Ok(()) => {
                    tracing::info!("[Remover] Removed {} (given {})", record, entry.token);
                    self.deleted.insert(digest);
                    entry.outcome = DeletionOutcome::Deleted;
                    report.manifest.push(record);
                }
                Err(e) => {
                    tracing::error!("[Remover] Failed to remove {}: {}", record, e);
                    entry.outcome = DeletionOutcome::DeleteFailed;
                    if entry.is_wildcard() {
                        report.success = false;
                    }
                }
            }
            report.entries.push(entry);
        }

        self.stats.record_images_removed(report.manifest.len() as u64);
        let still_running = report.count(DeletionOutcome::StillRunning);
        if still_running > 0 {
            self.stats.record_non_compliant(still_running as u64);
        }

        if let Some(sink) = &self.events {
            for record in &report.manifest {
                sink.image_removed(&self.node_name, record);
            }
        }

        tracing::info!(
            removed = report.manifest.len(),
            failed = report.count(DeletionOutcome::DeleteFailed),
            excluded = report.count(DeletionOutcome::Excluded),
            "[Remover] Batch finished (success: {})",
            report.success
        );

        report
    }
}
