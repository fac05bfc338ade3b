//! `crictl`-backed runtime inventory.
//!
//! Shells out to `crictl --runtime-endpoint <socket> ... -o json` and parses
//! the JSON it prints. Every invocation runs under a timeout; a child still
//! running when the timeout fires is killed.

use super::{RunningContainer, RuntimeInventory, RuntimeKind, DEFAULT_CALL_TIMEOUT};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use prune_core::Image;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;

const CONTAINER_RUNNING: &str = "CONTAINER_RUNNING";

pub struct CrictlInventory {
    binary: String,
    endpoint: String,
    timeout: Duration,
}

impl CrictlInventory {
    pub fn new(runtime: &RuntimeKind) -> Self {
        Self {
            binary: "crictl".to_string(),
            endpoint: runtime.endpoint().to_string(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Use a specific `crictl` binary instead of the one on `PATH`
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.kill_on_drop(true);
        cmd.arg("--runtime-endpoint").arg(&self.endpoint).args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let description = format!("{} {}", self.binary, args.join(" "));

        tracing::debug!("[Crictl] Running: {}", description);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AgentError::Timeout(description.clone()))?
            .map_err(|e| AgentError::Runtime(format!("{} failed: {}", description, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Runtime(format!(
                "{} exited with {}: {}",
                description,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl RuntimeInventory for CrictlInventory {
    async fn list_images(&self) -> Result<Vec<Image>> {
        let stdout = self.run(&["images", "-o", "json"]).await?;
        parse_images(&stdout)
    }

    async fn list_containers(&self) -> Result<Vec<RunningContainer>> {
        let stdout = self.run(&["ps", "--state", "running", "-o", "json"]).await?;
        parse_containers(&stdout)
    }

    async fn delete_image(&self, digest: &str) -> Result<()> {
        self.run(&["rmi", digest]).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ImageList {
    #[serde(default)]
    images: Vec<CrictlImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrictlImage {
    id: String,
    #[serde(default)]
    repo_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ContainerList {
    #[serde(default)]
    containers: Vec<CrictlContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrictlContainer {
    id: String,
    #[serde(default)]
    image_ref: String,
    #[serde(default)]
    image: Option<ImageSpec>,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ImageSpec {
    #[serde(default)]
    image: String,
}

/// Parse `crictl images -o json`
pub fn parse_images(stdout: &[u8]) -> Result<Vec<Image>> {
    let list: ImageList = serde_json::from_slice(stdout)?;
    Ok(list
        .images
        .into_iter()
        .map(|img| Image::new(img.id, img.repo_tags))
        .collect())
}

/// Parse `crictl ps -o json`, keeping only running containers
pub fn parse_containers(stdout: &[u8]) -> Result<Vec<RunningContainer>> {
    let list: ContainerList = serde_json::from_slice(stdout)?;
    Ok(list
        .containers
        .into_iter()
        .filter(|c| c.state.is_empty() || c.state == CONTAINER_RUNNING)
        .map(|c| RunningContainer {
            id: c.id,
            image: c.image.map(|spec| spec.image).unwrap_or_default(),
            image_ref: c.image_ref,
        })
        .collect())
}
