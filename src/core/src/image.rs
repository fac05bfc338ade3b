//! Container image types as reported by the node runtime

use serde::{Deserialize, Serialize};

/// An image present on a node.
///
/// The digest is the only stable identity. `names` are `repo:tag` strings in
/// the order the runtime reported them; the first one is used for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub digest: String,
    #[serde(default)]
    pub names: Vec<String>,
}

impl Image {
    pub fn new(digest: impl Into<String>, names: Vec<String>) -> Self {
        Self {
            digest: digest.into(),
            names,
        }
    }

    /// Canonical display name (first repo tag), if any
    pub fn display_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Whether `reference` names this image, either by digest or by one of its tags
    pub fn is_referenced_by(&self, reference: &str) -> bool {
        self.digest == reference || self.names.iter().any(|n| n == reference)
    }
}

/// Digest plus display name, used for removal manifests, events and the
/// collect-phase image list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRecord {
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ImageRecord {
    pub fn new(digest: impl Into<String>, name: Option<String>) -> Self {
        Self {
            digest: digest.into(),
            name,
        }
    }

    /// Build a record for `digest` using the first of `names` as display name
    pub fn from_names(digest: &str, names: &[String]) -> Self {
        Self {
            digest: digest.to_string(),
            name: names.first().cloned(),
        }
    }
}

impl From<&Image> for ImageRecord {
    fn from(image: &Image) -> Self {
        Self::from_names(&image.digest, &image.names)
    }
}

impl std::fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.digest),
            None => write!(f, "{}", self.digest),
        }
    }
}
