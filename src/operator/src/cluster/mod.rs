//! Control-plane access.
//!
//! [`ClusterClient`] is everything the orchestrator, controller and executor
//! read and write. Updates carry the `resource_version` the caller last saw;
//! a stale version fails with [`ReconcileError::Conflict`](crate::error::ReconcileError::Conflict).

pub mod memory;

pub use memory::InMemoryCluster;

use crate::error::Result;
use async_trait::async_trait;
use prune_core::{ConfigMap, DesiredState, Node, Pod, WorkItem};
use tokio::sync::broadcast;

/// Change notifications published by the cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A DesiredState was created or its spec changed
    DesiredStateChanged { name: String },
    /// A WorkItem was created or its status changed
    WorkItemChanged { item: WorkItem },
    WorkItemDeleted { name: String },
    /// A pod was created or its phase changed
    PodChanged { pod: Pod },
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_desired_state(&self, name: &str) -> Result<Option<DesiredState>>;

    /// Write the status of `desired`. Spec and generation are left untouched.
    async fn update_desired_state_status(&self, desired: &DesiredState) -> Result<DesiredState>;

    async fn list_work_items(&self) -> Result<Vec<WorkItem>>;

    async fn get_work_item(&self, name: &str) -> Result<Option<WorkItem>>;

    /// Create a WorkItem. The cluster assigns name (from `generate_name`), uid
    /// and creation time.
    async fn create_work_item(&self, item: WorkItem) -> Result<WorkItem>;

    async fn update_work_item_status(&self, item: &WorkItem) -> Result<WorkItem>;

    async fn delete_work_item(&self, name: &str) -> Result<()>;

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap>;

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>>;

    /// ConfigMaps carrying `label=value`
    async fn list_config_maps(&self, label: &str, value: &str) -> Result<Vec<ConfigMap>>;

    /// Every ConfigMap controlled by the object with `owner_uid`
    async fn list_owned_config_maps(&self, owner_uid: &str) -> Result<Vec<ConfigMap>>;

    async fn delete_config_map(&self, name: &str) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn list_pods(&self) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: Pod) -> Result<Pod>;

    async fn update_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, name: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent>;
}
