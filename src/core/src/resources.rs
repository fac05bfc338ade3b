//! Cluster objects read and written by the orchestrator.
//!
//! These mirror the shape of the control-plane resources without tying the
//! crate to a particular API client: every object carries a `resource_version`
//! that the cluster bumps on each write and checks on update (optimistic
//! concurrency), and child objects point back at their controller through an
//! [`OwnerReference`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference from a child object to the object that controls it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

impl OwnerReference {
    pub fn controller(kind: &str, name: &str, uid: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: true,
        }
    }
}

/// The user-declared list of images to remove plus the outcome of the last run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped on every spec change
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub resource_version: u64,
    pub spec: DesiredStateSpec,
    #[serde(default)]
    pub status: DesiredStateStatus,
}

impl DesiredState {
    pub const KIND: &'static str = "DesiredState";

    pub fn new(name: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            name: name.into(),
            spec: DesiredStateSpec { images },
            ..Default::default()
        }
    }

    pub fn controller_ref(&self) -> OwnerReference {
        OwnerReference::controller(Self::KIND, &self.name, &self.uid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredStateSpec {
    /// Digests, `repo:tag` names, or `*` for every non-running image
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredStateStatus {
    #[serde(default)]
    pub success: i64,
    #[serde(default)]
    pub failed: i64,
    #[serde(default)]
    pub skipped: i64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Spec generation that has already been turned into a WorkItem
    #[serde(default)]
    pub observed_generation: Option<u64>,
}

/// Lifecycle phase of a WorkItem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One cluster-wide fan-out batch of per-node removal work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub name: String,
    /// Name prefix used when the cluster assigns the name on create
    #[serde(default)]
    pub generate_name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_version: u64,
    pub spec: WorkItemSpec,
    #[serde(default)]
    pub status: WorkItemStatus,
}

impl WorkItem {
    pub const KIND: &'static str = "WorkItem";

    pub fn controller_ref(&self) -> OwnerReference {
        OwnerReference::controller(Self::KIND, &self.name, &self.uid)
    }

    /// Whether this item is controlled by the object behind `owner`
    pub fn is_controlled_by(&self, owner: &OwnerReference) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|o| o.controller && o.kind == owner.kind && o.uid == owner.uid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSpec {
    pub template: PodTemplate,
    /// DesiredState generation this item was created from
    #[serde(default)]
    pub desired_generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemStatus {
    #[serde(default)]
    pub phase: Phase,
    /// Number of pods fanned out (eligible nodes)
    #[serde(default)]
    pub desired: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    /// Nodes left out by the node filter
    #[serde(default)]
    pub skipped: u32,
    /// Written once, on first observation of a terminal phase
    #[serde(default)]
    pub delete_after: Option<DateTime<Utc>>,
}

impl WorkItemStatus {
    /// Fraction of fanned-out pods that succeeded. An item with nothing to do
    /// counts as fully successful.
    pub fn success_fraction(&self) -> f64 {
        if self.desired == 0 {
            return 1.0;
        }
        f64::from(self.succeeded) / f64::from(self.desired)
    }
}

/// Pod template for the per-node agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub container_name: String,
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub memory_request: String,
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub memory_limit: String,
    #[serde(default)]
    pub service_account: String,
    #[serde(default)]
    pub priority_class_name: String,
    #[serde(default)]
    pub pull_secrets: Vec<String>,
}

/// A ConfigMap mounted into the agent container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub config_map: String,
    pub mount_path: String,
}

/// Key/value configuration object. Carries the serialized target list for a
/// WorkItem and the exclusion patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub generate_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub resource_version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// One node's execution of the agent for a WorkItem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub node_name: String,
    pub owner: OwnerReference,
    pub template: PodTemplate,
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub resource_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminal() {
        assert!(!Phase::Pending.is_terminal());
        assert!(!Phase::Running.is_terminal());
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
    }

    #[test]
    fn test_success_fraction() {
        let status = WorkItemStatus {
            desired: 4,
            succeeded: 2,
            failed: 2,
            ..Default::default()
        };
        assert_eq!(status.success_fraction(), 0.5);
        assert_eq!(WorkItemStatus::default().success_fraction(), 1.0);
    }

    #[test]
    fn test_controller_ownership() {
        let mut desired = DesiredState::new("imagelist", vec!["*".to_string()]);
        desired.uid = "uid-1".to_string();
        let owner = desired.controller_ref();

        let item = WorkItem {
            owner: Some(owner.clone()),
            ..Default::default()
        };
        assert!(item.is_controlled_by(&owner));

        let other = OwnerReference::controller(DesiredState::KIND, "imagelist", "uid-2");
        assert!(!item.is_controlled_by(&other));
        assert!(!WorkItem::default().is_controlled_by(&owner));
    }
}
