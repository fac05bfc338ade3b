//! Resolves a node inventory into running and non-running key maps.
//!
//! Images and tags are many-to-many: one digest can carry several tags and a
//! tag can be reported on more than one digest. Both maps are keyed by every
//! digest and every name, and map to the digest the key resolves to.
//!
//! Known limitation: when two images report the same name, the image
//! enumerated later owns that key. Targeting such a name by tag removes only
//! that image.

use crate::inventory::InventorySnapshot;
use prune_core::ImageRecord;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSets {
    /// Digest or name of an image used by a running container -> digest
    pub running: BTreeMap<String, String>,
    /// Digest or name of an image no running container uses -> digest
    pub non_running: BTreeMap<String, String>,
    /// Digest -> names, in runtime order
    pub names: BTreeMap<String, Vec<String>>,
}

impl ResolvedSets {
    /// Every digest that is safe to remove, sorted
    pub fn non_running_digests(&self) -> BTreeSet<&str> {
        self.non_running.values().map(String::as_str).collect()
    }

    pub fn names_of(&self, digest: &str) -> &[String] {
        self.names.get(digest).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Digest plus its first name, for manifests and events
    pub fn record(&self, digest: &str) -> ImageRecord {
        ImageRecord::from_names(digest, self.names_of(digest))
    }
}

/// Split the snapshot's images into running and non-running key maps
pub fn resolve(snapshot: &InventorySnapshot) -> ResolvedSets {
    let mut running_digests = BTreeSet::new();
    for reference in &snapshot.running_refs {
        for image in &snapshot.images {
            if image.is_referenced_by(reference) {
                running_digests.insert(image.digest.as_str());
            }
        }
    }

    let mut resolved = ResolvedSets::default();

    for image in &snapshot.images {
        resolved
            .names
            .insert(image.digest.clone(), image.names.clone());

        if running_digests.contains(image.digest.as_str()) {
            resolved
                .running
                .insert(image.digest.clone(), image.digest.clone());
            for name in &image.names {
                resolved.running.insert(name.clone(), image.digest.clone());
            }
        }
    }

    for image in &snapshot.images {
        if running_digests.contains(image.digest.as_str()) {
            continue;
        }

        for key in std::iter::once(&image.digest).chain(image.names.iter()) {
            if resolved.running.contains_key(key) {
                continue;
            }
            resolved.non_running.insert(key.clone(), image.digest.clone());
        }
    }

    tracing::debug!(
        running = resolved.running.len(),
        non_running = resolved.non_running.len(),
        "[Resolver] Resolved inventory"
    );

    resolved
}
