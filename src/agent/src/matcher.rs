//! Turns a target list into a deletion plan.
//!
//! Planning is pure: the same targets, resolved sets, exclusions and
//! already-processed digests always produce the same plan. Nothing here talks
//! to the runtime.

use crate::exclusion::ExclusionSet;
use crate::resolver::ResolvedSets;
use crate::targets::{TargetSpec, WILDCARD};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionOutcome {
    /// Planned for deletion; only exists between planning and removal
    Pending,
    Deleted,
    AlreadyDeletedThisRun,
    Excluded,
    StillRunning,
    NotFound,
    DeleteFailed,
}

impl std::fmt::Display for DeletionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeletionOutcome::Pending => "pending",
            DeletionOutcome::Deleted => "deleted",
            DeletionOutcome::AlreadyDeletedThisRun => "already deleted",
            DeletionOutcome::Excluded => "excluded",
            DeletionOutcome::StillRunning => "still running",
            DeletionOutcome::NotFound => "not found",
            DeletionOutcome::DeleteFailed => "delete failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Target token this entry came from (`*` for wildcard entries)
    pub token: String,
    /// Digest the token resolved to, if it resolved at all
    pub digest: Option<String>,
    pub outcome: DeletionOutcome,
}

impl PlanEntry {
    fn new(token: &str, digest: Option<&str>, outcome: DeletionOutcome) -> Self {
        Self {
            token: token.to_string(),
            digest: digest.map(String::from),
            outcome,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.token == WILDCARD
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    pub entries: Vec<PlanEntry>,
}

impl DeletionPlan {
    pub fn pending(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome == DeletionOutcome::Pending)
    }

    pub fn count(&self, outcome: DeletionOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

/// Build the deletion plan for `targets`.
///
/// Literal tokens are planned first, in list order, and the wildcard after
/// them wherever `*` appears in the list. `processed` holds digests already
/// removed earlier in this run; those are reported as already deleted and
/// never planned again. Within one plan a digest may be planned more than once
/// (a digest and its tag, or a literal also covered by `*`); the remover only
/// touches the runtime for the first of them that is still present.
pub fn plan(
    targets: &TargetSpec,
    resolved: &ResolvedSets,
    exclusions: &ExclusionSet,
    processed: &HashSet<String>,
) -> DeletionPlan {
    let mut entries = Vec::new();
    let mut prune_all = false;

    for token in targets.tokens() {
        if token == WILDCARD {
            prune_all = true;
            continue;
        }

        if let Some(digest) = resolved.non_running.get(token) {
            let outcome = if exclusions.is_excluded(token, digest, resolved.names_of(digest)) {
                DeletionOutcome::Excluded
            } else if processed.contains(digest) {
                DeletionOutcome::AlreadyDeletedThisRun
            } else {
                DeletionOutcome::Pending
            };
            entries.push(PlanEntry::new(token, Some(digest), outcome));
        } else if let Some(digest) = resolved.running.get(token) {
            entries.push(PlanEntry::new(token, Some(digest), DeletionOutcome::StillRunning));
        } else {
            entries.push(PlanEntry::new(token, None, DeletionOutcome::NotFound));
        }
    }

    if prune_all {
        for digest in resolved.non_running_digests() {
            if processed.contains(digest) {
                continue;
            }
            let outcome = if exclusions.is_excluded(digest, digest, resolved.names_of(digest)) {
                DeletionOutcome::Excluded
            } else {
                DeletionOutcome::Pending
            };
            entries.push(PlanEntry::new(WILDCARD, Some(digest), outcome));
        }
    }

    DeletionPlan { entries }
}
