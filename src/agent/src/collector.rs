//! Collect phase: list every image no running container uses.

use crate::error::Result;
use crate::inventory::{InventorySnapshot, RuntimeInventory};
use crate::resolver::resolve;
use prune_core::ImageRecord;
use std::time::Duration;

/// Every non-running image on the node, once per digest, sorted by digest
pub async fn collect_non_running(
    inventory: &dyn RuntimeInventory,
    timeout: Duration,
) -> Result<Vec<ImageRecord>> {
    let snapshot = InventorySnapshot::capture(inventory, timeout).await?;
    let resolved = resolve(&snapshot);

    let images: Vec<ImageRecord> = resolved
        .non_running_digests()
        .into_iter()
        .map(|digest| resolved.record(digest))
        .collect();

    tracing::info!(
        "[Collector] {} of {} images are not in use",
        images.len(),
        snapshot.images.len()
    );
    Ok(images)
}
