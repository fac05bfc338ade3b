//! Manager configuration.
//!
//! The on-disk document is versioned (`prune.dev/v1alpha2`, `prune.dev/v1alpha3`).
//! Everything downstream works on the unversioned [`PruneConfig`]; each
//! versioned module converts to and from it field by field.

pub mod unversioned;
pub mod v1alpha2;
pub mod v1alpha3;

pub use unversioned::{
    Components, ContainerConfig, FilterKind, ImageJob, ImageJobCleanup, NodeFilter,
    OptionalContainerConfig, Profile, PruneConfig, RepoTag, ResourceRequirements, Scheduling,
};

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

pub const API_VERSION_V1ALPHA2: &str = "prune.dev/v1alpha2";
pub const API_VERSION_V1ALPHA3: &str = "prune.dev/v1alpha3";

/// Load a manager configuration file and convert it to the unversioned form
pub fn load_config(path: impl AsRef<Path>) -> Result<PruneConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    let config = parse_config(&content)?;
    tracing::debug!("[Config] Loaded {} (runtime {})", path.display(), config.runtime);
    Ok(config)
}

/// Parse a manager configuration document, dispatching on `apiVersion`
pub fn parse_config(content: &str) -> Result<PruneConfig> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::Config("missing apiVersion".to_string()))?
        .to_string();

    match version.as_str() {
        API_VERSION_V1ALPHA2 => {
            let versioned: v1alpha2::ManagerConfig = serde_yaml::from_value(value)?;
            Ok(versioned.into())
        }
        API_VERSION_V1ALPHA3 => {
            let versioned: v1alpha3::ManagerConfig = serde_yaml::from_value(value)?;
            Ok(versioned.into())
        }
        _ => Err(CoreError::UnsupportedVersion(version)),
    }
}

/// A span of time written as `90s`, `5m`, `24h` or a bare number of seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const ZERO: Duration = Duration(std::time::Duration::ZERO);

    /// Longest duration `chrono::Duration` can hold in whole seconds
    pub const MAX_SECS: u64 = i64::MAX as u64 / 1000;

    pub fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub fn from_hours(hours: u64) -> Self {
        Self::from_secs(hours.saturating_mul(3600))
    }

    pub fn as_std(&self) -> std::time::Duration {
        self.0
    }

    /// Saturates at [`Duration::MAX_SECS`]
    pub fn as_chrono(&self) -> chrono::Duration {
        let secs = self.0.as_secs().min(Self::MAX_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidDuration("empty duration".to_string()));
        }

        let (number, multiplier) = match s.chars().last() {
            Some('s') => (&s[..s.len() - 1], 1),
            Some('m') => (&s[..s.len() - 1], 60),
            Some('h') => (&s[..s.len() - 1], 3600),
            _ => (s, 1),
        };

        let value: u64 = number
            .parse()
            .map_err(|_| CoreError::InvalidDuration(s.to_string()))?;
        match value.checked_mul(multiplier) {
            Some(secs) if secs <= Self::MAX_SECS => Ok(Self::from_secs(secs)),
            _ => Err(CoreError::InvalidDuration(format!("{} is out of range", s))),
        }
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self(d)
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0.as_secs();
        if secs != 0 && secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl std::str::FromStr for Duration {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Duration::parse(s)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) if secs <= Duration::MAX_SECS => Ok(Duration::from_secs(secs)),
            Raw::Secs(secs) => Err(serde::de::Error::custom(format!(
                "duration of {}s is out of range",
                secs
            ))),
            Raw::Text(text) => Duration::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_parse() {
        assert_eq!(Duration::parse("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(Duration::parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(Duration::parse("24h").unwrap(), Duration::from_hours(24));
        assert_eq!(Duration::parse("42").unwrap(), Duration::from_secs(42));
        assert!(Duration::parse("").is_err());
        assert!(Duration::parse("tomorrow").is_err());
        assert!(Duration::parse("-5m").is_err());
    }

    #[test]
    fn test_duration_out_of_range() {
        assert!(Duration::parse("9999999999999999h").is_err());
        assert!(Duration::parse("10000000000000000s").is_err());
        assert!(Duration::parse(&format!("{}s", Duration::MAX_SECS)).is_ok());
        assert!(Duration::parse(&format!("{}s", Duration::MAX_SECS + 1)).is_err());
    }

    #[test]
    fn test_as_chrono_saturates() {
        let huge = Duration::from(std::time::Duration::from_secs(u64::MAX));
        assert_eq!(
            huge.as_chrono(),
            chrono::Duration::seconds(Duration::MAX_SECS as i64)
        );
        assert_eq!(Duration::from_secs(90).as_chrono(), chrono::Duration::seconds(90));
    }

    #[test]
    fn test_duration_display() {
        assert_eq!(Duration::from_hours(24).to_string(), "24h");
        assert_eq!(Duration::from_secs(300).to_string(), "5m");
        assert_eq!(Duration::from_secs(90).to_string(), "90s");
        assert_eq!(Duration::ZERO.to_string(), "0s");
    }
}
