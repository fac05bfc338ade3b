//! Agent error types
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The container runtime rejected or failed a call
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// Handshake data did not match the expected marker. Fatal for the node run.
    #[error("Corrupted handshake: {0}")]
    Corruption(String),

    #[error("Invalid target list: {0}")]
    InvalidTargets(String),

    #[error("Invalid exclusion pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown runtime: {0}")]
    UnknownRuntime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<globset::Error> for AgentError {
    fn from(e: globset::Error) -> Self {
        AgentError::InvalidPattern(e.to_string())
    }
}

impl From<String> for AgentError {
    fn from(s: String) -> Self {
        AgentError::Runtime(s)
    }
}
