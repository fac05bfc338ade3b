//! Shared contracts for cluster image pruning.
//!
//! This crate holds the types that cross the node/cluster boundary: images as the
//! container runtime reports them, the cluster objects the orchestrator reads and
//! writes (DesiredState, WorkItem, ConfigMap, Node, Pod), the versioned manager
//! configuration and the metrics sink both processes report into.

pub mod config;
pub mod error;
pub mod image;
pub mod metrics;
pub mod resources;

pub use config::{load_config, Duration, PruneConfig};
pub use error::{CoreError, Result};
pub use image::{Image, ImageRecord};
pub use metrics::{MetricsRegistry, MetricsSnapshot, StatsReporter};
pub use resources::{
    ConfigMap, DesiredState, DesiredStateSpec, DesiredStateStatus, Node, OwnerReference, Phase,
    Pod, PodPhase, PodTemplate, VolumeMount, WorkItem, WorkItemSpec, WorkItemStatus,
};
