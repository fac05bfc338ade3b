//! Container runtime inventory.
//!
//! [`RuntimeInventory`] is the only seam between the agent and the node's
//! container runtime. Everything above it works on an [`InventorySnapshot`]
//! taken once per run.

pub mod crictl;

pub use crictl::CrictlInventory;

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use prune_core::Image;
use std::future::Future;
use std::time::Duration;

/// Default bound for every inventory query and delete call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// A running container and the image it was started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    /// Image reference as written in the container spec (name or digest)
    pub image: String,
    /// Resolved image id (digest), when the runtime reports one
    pub image_ref: String,
}

/// Image operations the agent needs from a container runtime
#[async_trait]
pub trait RuntimeInventory: Send + Sync {
    /// List every image on the node
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// List running containers
    async fn list_containers(&self) -> Result<Vec<RunningContainer>>;

    /// Remove an image by digest
    async fn delete_image(&self, digest: &str) -> Result<()>;
}

/// Point-in-time view of a node's images and the references held by running
/// containers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventorySnapshot {
    pub images: Vec<Image>,
    pub running_refs: Vec<String>,
}

impl InventorySnapshot {
    /// Query the runtime once, bounding each call by `timeout`
    pub async fn capture(inventory: &dyn RuntimeInventory, timeout: Duration) -> Result<Self> {
        let images = with_timeout(timeout, "list images", inventory.list_images()).await?;
        let containers =
            with_timeout(timeout, "list containers", inventory.list_containers()).await?;

        let mut running_refs = Vec::with_capacity(containers.len() * 2);
        for container in containers {
            if !container.image_ref.is_empty() {
                running_refs.push(container.image_ref);
            }
            if !container.image.is_empty() {
                running_refs.push(container.image);
            }
        }

        tracing::debug!(
            "[Inventory] Snapshot: {} images, {} running refs",
            images.len(),
            running_refs.len()
        );

        Ok(Self {
            images,
            running_refs,
        })
    }
}

/// Run a runtime call under `timeout`, mapping expiry to [`AgentError::Timeout`]
pub async fn with_timeout<T, F>(timeout: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| AgentError::Timeout(format!("{} after {:?}", what, timeout)))?
}

/// Which container runtime socket to talk to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeKind {
    Containerd,
    CriO,
    DockerShim,
    /// Explicit socket address
    Custom(String),
}

impl RuntimeKind {
    pub fn endpoint(&self) -> &str {
        match self {
            RuntimeKind::Containerd => "unix:///run/containerd/containerd.sock",
            RuntimeKind::CriO => "unix:///var/run/crio/crio.sock",
            RuntimeKind::DockerShim => "unix:///var/run/dockershim.sock",
            RuntimeKind::Custom(address) => address,
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "containerd" => Ok(RuntimeKind::Containerd),
            "crio" | "cri-o" => Ok(RuntimeKind::CriO),
            "docker" | "dockershim" => Ok(RuntimeKind::DockerShim),
            other if other.starts_with("unix://") => Ok(RuntimeKind::Custom(s.to_string())),
            _ => Err(AgentError::UnknownRuntime(s.to_string())),
        }
    }
}
