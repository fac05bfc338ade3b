//! Shared fixtures for operator integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use prune_agent::{RunningContainer, RuntimeInventory};
use prune_core::{Image, MetricsRegistry, Node, PodPhase, PruneConfig, WorkItem};
use prune_operator::template;
use prune_operator::{ClusterClient, InMemoryCluster, JobOrchestrator, ManualClock};
use std::sync::{Arc, Mutex};

pub struct Fixture {
    pub cluster: Arc<InMemoryCluster>,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<MetricsRegistry>,
    pub orchestrator: JobOrchestrator,
}

impl Fixture {
    pub fn new(config: PruneConfig) -> Self {
        let cluster = Arc::new(InMemoryCluster::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let registry = Arc::new(MetricsRegistry::new());
        let orchestrator = JobOrchestrator::new(
            cluster.clone(),
            clock.clone(),
            registry.clone(),
            config,
        );
        Self {
            cluster,
            clock,
            registry,
            orchestrator,
        }
    }

    pub fn with_nodes(self, names: &[&str]) -> Self {
        for name in names {
            self.cluster
                .add_node(Node::new(*name).with_label("kubernetes.io/os", "linux"));
        }
        self
    }

    pub async fn work_items(&self) -> Vec<WorkItem> {
        self.cluster.list_work_items().await.unwrap()
    }

    pub async fn only_work_item(&self) -> WorkItem {
        let items = self.work_items().await;
        assert_eq!(items.len(), 1, "expected exactly one WorkItem");
        items.into_iter().next().unwrap()
    }

    /// Submit a WorkItem for `images` and fan it out
    pub async fn submit(&self, images: &[&str]) -> WorkItem {
        self.cluster.apply_desired_state(
            template::DESIRED_STATE_NAME,
            images.iter().map(|s| s.to_string()).collect(),
        );
        self.orchestrator
            .reconcile_desired_state(template::DESIRED_STATE_NAME)
            .await
            .unwrap();
        let item = self.only_work_item().await;
        self.orchestrator.reconcile_work_item(&item.name).await.unwrap();
        self.cluster.get_work_item(&item.name).await.unwrap().unwrap()
    }

    /// Finish the item's pods in order with `phases` and let the item settle
    pub async fn finish_pods(&self, item: &WorkItem, phases: &[PodPhase]) -> WorkItem {
        let mut pods: Vec<_> = self
            .cluster
            .list_pods()
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.owner.uid == item.uid)
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(pods.len(), phases.len());

        for (pod, phase) in pods.iter_mut().zip(phases) {
            pod.phase = *phase;
            self.cluster.update_pod(pod).await.unwrap();
        }

        self.orchestrator.reconcile_work_item(&item.name).await.unwrap();
        self.cluster.get_work_item(&item.name).await.unwrap().unwrap()
    }
}

/// Runtime with fixed images and containers that records deletions
#[derive(Default)]
pub struct FakeInventory {
    images: Mutex<Vec<Image>>,
    containers: Vec<RunningContainer>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, digest: &str, names: &[&str]) -> Self {
        self.images
            .lock()
            .unwrap()
            .push(Image::new(digest, names.iter().map(|n| n.to_string()).collect()));
        self
    }

    pub fn with_container(mut self, id: &str, image: &str) -> Self {
        self.containers.push(RunningContainer {
            id: id.to_string(),
            image: image.to_string(),
            image_ref: String::new(),
        });
        self
    }

    pub fn remaining(&self) -> Vec<String> {
        self.images
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.digest.clone())
            .collect()
    }
}

#[async_trait]
impl RuntimeInventory for FakeInventory {
    async fn list_images(&self) -> prune_agent::Result<Vec<Image>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn list_containers(&self) -> prune_agent::Result<Vec<RunningContainer>> {
        Ok(self.containers.clone())
    }

    async fn delete_image(&self, digest: &str) -> prune_agent::Result<()> {
        self.images.lock().unwrap().retain(|i| i.digest != digest);
        Ok(())
    }
}
