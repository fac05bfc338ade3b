//! Node-local image pruning.
//!
//! Pipeline for one node run:
//!
//! 1. [`InventorySnapshot::capture`] queries the runtime once
//! 2. [`resolver::resolve`] splits images into running and non-running keys
//! 3. [`matcher::plan`] turns the target list into a [`DeletionPlan`]
//! 4. [`ImageRemover`] executes the plan and produces a [`RemovalReport`]

pub mod collector;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod handshake;
pub mod inventory;
pub mod matcher;
pub mod remover;
pub mod resolver;
pub mod run;
pub mod targets;

pub use collector::collect_non_running;
pub use error::{AgentError, Result};
pub use events::{EventSink, RecordingEventSink, TracingEventSink};
pub use exclusion::ExclusionSet;
pub use handshake::Handshake;
pub use inventory::{
    CrictlInventory, InventorySnapshot, RunningContainer, RuntimeInventory, RuntimeKind,
};
pub use matcher::{DeletionOutcome, DeletionPlan, PlanEntry};
pub use remover::{ImageRemover, RemovalReport};
pub use resolver::ResolvedSets;
pub use run::{run_removal, targets_from_records, NodeRun};
pub use targets::{TargetSpec, WILDCARD};
