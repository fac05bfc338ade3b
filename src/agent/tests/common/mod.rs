//! Shared fixtures for agent integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use prune_agent::{AgentError, Result, RunningContainer, RuntimeInventory};
use prune_core::Image;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// In-memory runtime. Deletes remove the image; selected digests can be made
/// to fail or hang.
#[derive(Default)]
pub struct FakeInventory {
    images: Mutex<Vec<Image>>,
    containers: Vec<RunningContainer>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    delete_calls: Mutex<Vec<String>>,
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

    /// A running container started from `image` (a name or a digest)
    pub fn with_container(mut self, id: &str, image: &str) -> Self {
        self.containers.push(RunningContainer {
            id: id.to_string(),
            image: image.to_string(),
            image_ref: String::new(),
        });
        self
    }

    pub fn failing_on(mut self, digest: &str) -> Self {
        self.failing.insert(digest.to_string());
        self
    }

    pub fn hanging_on(mut self, digest: &str) -> Self {
        self.hanging.insert(digest.to_string());
        self
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.delete_calls.lock().unwrap().clone()
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
    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn list_containers(&self) -> Result<Vec<RunningContainer>> {
        Ok(self.containers.clone())
    }

    async fn delete_image(&self, digest: &str) -> Result<()> {
        self.delete_calls.lock().unwrap().push(digest.to_string());

        if self.hanging.contains(digest) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(digest) {
            return Err(AgentError::Runtime(format!("image {} is locked", digest)));
        }

        self.images.lock().unwrap().retain(|i| i.digest != digest);
        Ok(())
    }
}
