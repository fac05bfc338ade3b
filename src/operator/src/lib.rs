//! Cluster-level orchestration of image pruning.
//!
//! The [`JobOrchestrator`] turns the well-known DesiredState into one
//! WorkItem at a time, fans it out as one pod per eligible node, judges the
//! result against the configured success ratio and removes it after the
//! configured delay. The [`Controller`] drives it from cluster events.

pub mod clock;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod executor;
pub mod metrics_server;
pub mod node_filter;
pub mod orchestrator;
pub mod template;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{ClusterClient, ClusterEvent, InMemoryCluster};
pub use controller::{Controller, ControllerSettings};
pub use error::{ReconcileError, Result};
pub use executor::PodExecutor;
pub use node_filter::NodeFilterPolicy;
pub use orchestrator::{Action, JobOrchestrator, ReconcileRequest, RUNNING_REQUEUE};
pub use template::DESIRED_STATE_NAME;
