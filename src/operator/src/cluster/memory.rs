//! In-process cluster backing the standalone operator and the tests.

use super::{ClusterClient, ClusterEvent};
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use chrono::Utc;
use prune_core::{ConfigMap, DesiredState, DesiredStateSpec, Node, Pod, WorkItem};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct ClusterState {
    desired: BTreeMap<String, DesiredState>,
    work_items: BTreeMap<String, WorkItem>,
    config_maps: BTreeMap<String, ConfigMap>,
    nodes: BTreeMap<String, Node>,
    pods: BTreeMap<String, Pod>,
    version: u64,
}

impl ClusterState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// Cluster state held in memory with optimistic concurrency on every update
pub struct InMemoryCluster {
    namespace: String,
    state: Mutex<ClusterState>,
    events: broadcast::Sender<ClusterEvent>,
    injected_conflicts: AtomicUsize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new("prune-system")
    }
}

impl InMemoryCluster {
    pub fn new(namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            namespace: namespace.into(),
            state: Mutex::new(ClusterState::default()),
            events,
            injected_conflicts: AtomicUsize::new(0),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, event: ClusterEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Fail the next `count` updates with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self, what: &str) -> Result<()> {
        let taken = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(ReconcileError::Conflict(format!("{} (injected)", what))),
            Err(_) => Ok(()),
        }
    }

    pub fn add_node(&self, node: Node) {
        tracing::debug!("[Cluster] Node {} registered", node.name);
        self.state().nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, name: &str) {
        self.state().nodes.remove(name);
    }

    /// Create the DesiredState or replace its image list. The generation is
    /// bumped only when the list actually changes.
    pub fn apply_desired_state(&self, name: &str, images: Vec<String>) -> DesiredState {
        let (desired, changed) = {
            let mut state = self.state();
            let version = state.next_version();
            match state.desired.get_mut(name) {
                Some(existing) if existing.spec.images == images => (existing.clone(), false),
                Some(existing) => {
                    existing.spec = DesiredStateSpec { images };
                    existing.generation += 1;
                    existing.resource_version = version;
                    (existing.clone(), true)
                }
                None => {
                    let mut desired = DesiredState::new(name, images);
                    desired.uid = Uuid::new_v4().to_string();
                    desired.generation = 1;
                    desired.resource_version = version;
                    state.desired.insert(name.to_string(), desired.clone());
                    (desired, true)
                }
            }
        };

        if changed {
            tracing::info!(
                "[Cluster] DesiredState {} at generation {} ({} images)",
                name,
                desired.generation,
                desired.spec.images.len()
            );
            self.publish(ClusterEvent::DesiredStateChanged {
                name: name.to_string(),
            });
        }
        desired
    }

    pub fn pod_count(&self) -> usize {
        self.state().pods.len()
    }
}

fn generated_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..5])
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get_desired_state(&self, name: &str) -> Result<Option<DesiredState>> {
        Ok(self.state().desired.get(name).cloned())
    }

    async fn update_desired_state_status(&self, desired: &DesiredState) -> Result<DesiredState> {
        self.take_injected_conflict(&desired.name)?;
        let mut state = self.state();
        let version = state.next_version();
        let stored = state
            .desired
            .get_mut(&desired.name)
            .ok_or_else(|| ReconcileError::NotFound(format!("DesiredState {}", desired.name)))?;

        if stored.resource_version != desired.resource_version {
            return Err(ReconcileError::Conflict(format!(
                "DesiredState {} is at version {}, update was based on {}",
                desired.name, stored.resource_version, desired.resource_version
            )));
        }

        stored.status = desired.status.clone();
        stored.resource_version = version;
        Ok(stored.clone())
    }

    async fn list_work_items(&self) -> Result<Vec<WorkItem>> {
        Ok(self.state().work_items.values().cloned().collect())
    }

    async fn get_work_item(&self, name: &str) -> Result<Option<WorkItem>> {
        Ok(self.state().work_items.get(name).cloned())
    }

    async fn create_work_item(&self, mut item: WorkItem) -> Result<WorkItem> {
        {
            let mut state = self.state();
            if item.name.is_empty() {
                item.name = generated_name(&item.generate_name);
            }
            if state.work_items.contains_key(&item.name) {
                return Err(ReconcileError::AlreadyExists(format!("WorkItem {}", item.name)));
            }
            item.uid = Uuid::new_v4().to_string();
            item.created_at = Some(Utc::now());
            item.resource_version = state.next_version();
            state.work_items.insert(item.name.clone(), item.clone());
        }

        self.publish(ClusterEvent::WorkItemChanged { item: item.clone() });
        Ok(item)
    }

    async fn update_work_item_status(&self, item: &WorkItem) -> Result<WorkItem> {
        self.take_injected_conflict(&item.name)?;
        let updated = {
            let mut state = self.state();
            let version = state.next_version();
            let stored = state
                .work_items
                .get_mut(&item.name)
                .ok_or_else(|| ReconcileError::NotFound(format!("WorkItem {}", item.name)))?;

            if stored.resource_version != item.resource_version {
                return Err(ReconcileError::Conflict(format!(
                    "WorkItem {} is at version {}, update was based on {}",
                    item.name, stored.resource_version, item.resource_version
                )));
            }

            stored.status = item.status.clone();
            stored.resource_version = version;
            stored.clone()
        };

        self.publish(ClusterEvent::WorkItemChanged {
            item: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete_work_item(&self, name: &str) -> Result<()> {
        let removed = self.state().work_items.remove(name);
        if removed.is_none() {
            return Err(ReconcileError::NotFound(format!("WorkItem {}", name)));
        }
        self.publish(ClusterEvent::WorkItemDeleted {
            name: name.to_string(),
        });
        Ok(())
    }

    async fn create_config_map(&self, mut config_map: ConfigMap) -> Result<ConfigMap> {
        let mut state = self.state();
        if config_map.name.is_empty() {
            config_map.name = generated_name(&config_map.generate_name);
        }
        if state.config_maps.contains_key(&config_map.name) {
            return Err(ReconcileError::AlreadyExists(format!(
                "ConfigMap {}",
                config_map.name
            )));
        }
        if config_map.namespace.is_empty() {
            config_map.namespace = self.namespace.clone();
        }
        config_map.resource_version = state.next_version();
        state
            .config_maps
            .insert(config_map.name.clone(), config_map.clone());
        Ok(config_map)
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.take_injected_conflict(&config_map.name)?;
        let mut state = self.state();
        let version = state.next_version();
        let stored = state
            .config_maps
            .get_mut(&config_map.name)
            .ok_or_else(|| ReconcileError::NotFound(format!("ConfigMap {}", config_map.name)))?;

        if stored.resource_version != config_map.resource_version {
            return Err(ReconcileError::Conflict(format!(
                "ConfigMap {} changed concurrently",
                config_map.name
            )));
        }
        // immutable maps still take metadata (owner, labels) updates
        if stored.immutable && stored.data != config_map.data {
            return Err(ReconcileError::Cluster(format!(
                "ConfigMap {} is immutable",
                config_map.name
            )));
        }

        *stored = config_map.clone();
        stored.resource_version = version;
        Ok(stored.clone())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        Ok(self.state().config_maps.get(name).cloned())
    }

    async fn list_config_maps(&self, label: &str, value: &str) -> Result<Vec<ConfigMap>> {
        Ok(self
            .state()
            .config_maps
            .values()
            .filter(|cm| cm.labels.get(label).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }

    async fn list_owned_config_maps(&self, owner_uid: &str) -> Result<Vec<ConfigMap>> {
        Ok(self
            .state()
            .config_maps
            .values()
            .filter(|cm| {
                cm.owner
                    .as_ref()
                    .is_some_and(|o| o.controller && o.uid == owner_uid)
            })
            .cloned()
            .collect())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        match self.state().config_maps.remove(name) {
            Some(_) => Ok(()),
            None => Err(ReconcileError::NotFound(format!("ConfigMap {}", name))),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state().nodes.values().cloned().collect())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.state().pods.values().cloned().collect())
    }

    async fn create_pod(&self, mut pod: Pod) -> Result<Pod> {
        {
            let mut state = self.state();
            if state.pods.contains_key(&pod.name) {
                return Err(ReconcileError::AlreadyExists(format!("Pod {}", pod.name)));
            }
            pod.resource_version = state.next_version();
            state.pods.insert(pod.name.clone(), pod.clone());
        }

        self.publish(ClusterEvent::PodChanged { pod: pod.clone() });
        Ok(pod)
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let updated = {
            let mut state = self.state();
            let version = state.next_version();
            let stored = state
                .pods
                .get_mut(&pod.name)
                .ok_or_else(|| ReconcileError::NotFound(format!("Pod {}", pod.name)))?;

            if stored.resource_version != pod.resource_version {
                return Err(ReconcileError::Conflict(format!(
                    "Pod {} changed concurrently",
                    pod.name
                )));
            }

            stored.phase = pod.phase;
            stored.resource_version = version;
            stored.clone()
        };

        self.publish(ClusterEvent::PodChanged {
            pod: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        match self.state().pods.remove(name) {
            Some(_) => Ok(()),
            None => Err(ReconcileError::NotFound(format!("Pod {}", name))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }
}
