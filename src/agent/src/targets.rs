//! Target list parsing.

use crate::error::{AgentError, Result};
use std::path::Path;

/// Sentinel token that targets every non-running image
pub const WILDCARD: &str = "*";

/// Ordered removal targets: digests, `repo:tag` names or [`WILDCARD`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    tokens: Vec<String>,
}

impl TargetSpec {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a JSON array of strings, or one token per line
    pub fn parse(content: &str) -> Result<Self> {
        let trimmed = content.trim();
        if trimmed.starts_with('[') {
            let tokens: Vec<String> = serde_json::from_str(trimmed)
                .map_err(|e| AgentError::InvalidTargets(e.to_string()))?;
            return Ok(Self::new(
                tokens.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            ));
        }

        Ok(Self::new(
            trimmed
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::InvalidTargets(format!("cannot read {}: {}", path.display(), e))
        })?;
        let spec = Self::parse(&content)?;
        tracing::info!(
            "[Targets] Loaded {} targets from {}",
            spec.len(),
            path.display()
        );
        Ok(spec)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.tokens.iter().any(|t| t == WILDCARD)
    }
}
