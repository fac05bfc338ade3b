//! Exclusion patterns.
//!
//! Exclusions arrive as ConfigMaps mounted under a directory, one file per
//! key. A file holds newline-separated glob patterns (blank lines and `#`
//! comments ignored), a JSON array of patterns, or a JSON object with an
//! `excluded` array.

use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

/// Case-sensitive glob patterns that protect images from removal
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    patterns: Vec<String>,
    matcher: GlobSet,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: GlobSet::empty(),
        }
    }
}

#[derive(Deserialize)]
struct ExcludedDocument {
    #[serde(default)]
    excluded: Vec<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = patterns.into_iter().map(Into::into).collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &unique {
            builder.add(Glob::new(pattern)?);
        }

        Ok(Self {
            patterns: unique.into_iter().collect(),
            matcher: builder.build()?,
        })
    }

    /// Load every pattern file under `dir`. A missing directory is an empty set.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            tracing::debug!("[Exclusion] No exclusion directory at {}", dir.display());
            return Ok(Self::default());
        }

        let mut patterns = Vec::new();
        // ConfigMap mounts keep their payload in `..data`-style dirs and link keys into them
        let walker = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with(".."));
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let content = std::fs::read_to_string(entry.path())?;
            let found = parse_patterns(&content)?;
            tracing::debug!(
                "[Exclusion] {} patterns from {}",
                found.len(),
                entry.path().display()
            );
            patterns.extend(found);
        }

        let set = Self::new(patterns)?;
        tracing::info!("[Exclusion] Loaded {} exclusion patterns", set.len());
        Ok(set)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any of `token`, `digest` or `names` matches a pattern
    pub fn is_excluded(&self, token: &str, digest: &str, names: &[String]) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        self.matcher.is_match(token)
            || self.matcher.is_match(digest)
            || names.iter().any(|name| self.matcher.is_match(name))
    }
}

/// Parse one exclusion file
pub fn parse_patterns(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    if trimmed.starts_with('{') {
        let doc: ExcludedDocument = serde_json::from_str(trimmed)?;
        return Ok(doc.excluded);
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_format() {
        let patterns = parse_patterns("# base images\nredis:*\n\n  docker.io/library/* \n").unwrap();
        assert_eq!(patterns, vec!["redis:*", "docker.io/library/*"]);
    }

    #[test]
    fn test_parse_json_formats() {
        assert_eq!(parse_patterns(r#"["a:*", "b"]"#).unwrap(), vec!["a:*", "b"]);
        assert_eq!(
            parse_patterns(r#"{"excluded": ["c:1"]}"#).unwrap(),
            vec!["c:1"]
        );
        assert!(parse_patterns("[not json").is_err());
    }

    #[test]
    fn test_matches_any_name_of_digest() {
        let set = ExclusionSet::new(["redis:*"]).unwrap();
        let names = vec!["cache:v1".to_string(), "redis:7".to_string()];
        assert!(set.is_excluded("cache:v1", "sha256:aaa", &names));
        assert!(!set.is_excluded("cache:v1", "sha256:aaa", &names[..1]));
    }

    #[test]
    fn test_case_sensitive() {
        let set = ExclusionSet::new(["Redis:*"]).unwrap();
        assert!(!set.is_excluded("redis:7", "sha256:aaa", &[]));
    }

    #[test]
    fn test_invalid_glob() {
        assert!(ExclusionSet::new(["[unclosed"]).is_err());
    }
}
