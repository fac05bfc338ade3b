use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Stale write. The whole reconcile is retried.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// More than one active WorkItem for one owner. Logged, never retried.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] prune_core::CoreError),

    /// Node run failed before producing a report
    #[error("Agent error: {0}")]
    Agent(#[from] prune_agent::AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound(_))
    }
}
