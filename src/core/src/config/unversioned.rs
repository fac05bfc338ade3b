use super::Duration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RUNTIME: &str = "containerd";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_REMOVER_REPO: &str = "ghcr.io/prune-dev/remover";
pub const DEFAULT_COLLECTOR_REPO: &str = "ghcr.io/prune-dev/collector";
pub const DEFAULT_SCANNER_REPO: &str = "ghcr.io/prune-dev/scanner";
pub const DEFAULT_IMAGE_TAG: &str = "v1.0.0";
pub const DEFAULT_PROFILE_PORT: u16 = 6060;

/// Node label that opts a node in or out, depending on the filter kind
pub const FILTER_LABEL: &str = "prune.dev/cleanup.filter";
pub const WINDOWS_SELECTOR: &str = "kubernetes.io/os=windows";

/// Canonical manager configuration. Every versioned document converts into this.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneConfig {
    pub runtime: String,
    pub otlp_endpoint: String,
    pub log_level: String,
    pub scheduling: Scheduling,
    pub profile: Profile,
    pub image_job: ImageJob,
    pub pull_secrets: Vec<String>,
    pub priority_class_name: String,
    pub node_filter: NodeFilter,
    pub components: Components,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            runtime: DEFAULT_RUNTIME.to_string(),
            otlp_endpoint: String::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            scheduling: Scheduling::default(),
            profile: Profile::default(),
            image_job: ImageJob::default(),
            pull_secrets: Vec::new(),
            priority_class_name: String::new(),
            node_filter: NodeFilter::default(),
            components: Components::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scheduling {
    pub repeat_interval: Duration,
    pub begin_immediately: bool,
}

impl Default for Scheduling {
    fn default() -> Self {
        Self {
            repeat_interval: Duration::from_hours(24),
            begin_immediately: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_PROFILE_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    /// Minimum fraction of nodes that must succeed for the item to complete
    pub success_ratio: f64,
    pub cleanup: ImageJobCleanup,
}

impl Default for ImageJob {
    fn default() -> Self {
        Self {
            success_ratio: 1.0,
            cleanup: ImageJobCleanup::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageJobCleanup {
    pub delay_on_success: Duration,
    pub delay_on_failure: Duration,
}

impl Default for ImageJobCleanup {
    fn default() -> Self {
        Self {
            delay_on_success: Duration::ZERO,
            delay_on_failure: Duration::from_hours(24),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Nodes matching a selector are skipped
    #[default]
    Exclude,
    /// Only nodes matching a selector are used
    Include,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeFilter {
    pub kind: FilterKind,
    /// `key` or `key=value` label selectors
    pub selectors: Vec<String>,
}

impl Default for NodeFilter {
    fn default() -> Self {
        Self {
            kind: FilterKind::Exclude,
            selectors: vec![FILTER_LABEL.to_string(), WINDOWS_SELECTOR.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub collector: OptionalContainerConfig,
    pub scanner: OptionalContainerConfig,
    pub remover: ContainerConfig,
}

impl Default for Components {
    fn default() -> Self {
        Self {
            collector: OptionalContainerConfig {
                enabled: false,
                container: ContainerConfig {
                    image: RepoTag::new(DEFAULT_COLLECTOR_REPO, DEFAULT_IMAGE_TAG),
                    request: ResourceRequirements::new("25Mi", "7m"),
                    limit: ResourceRequirements::new("500Mi", "0"),
                    config: None,
                },
            },
            scanner: OptionalContainerConfig {
                enabled: false,
                container: ContainerConfig {
                    image: RepoTag::new(DEFAULT_SCANNER_REPO, DEFAULT_IMAGE_TAG),
                    request: ResourceRequirements::new("500Mi", "1000m"),
                    limit: ResourceRequirements::new("2Gi", "0"),
                    config: None,
                },
            },
            remover: ContainerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OptionalContainerConfig {
    pub enabled: bool,
    pub container: ContainerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub image: RepoTag,
    pub request: ResourceRequirements,
    pub limit: ResourceRequirements,
    /// Opaque component-specific configuration
    pub config: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: RepoTag::new(DEFAULT_REMOVER_REPO, DEFAULT_IMAGE_TAG),
            request: ResourceRequirements::new("25Mi", "0"),
            limit: ResourceRequirements::new("30Mi", "0"),
            config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepoTag {
    pub repo: String,
    pub tag: String,
}

impl RepoTag {
    pub fn new(repo: &str, tag: &str) -> Self {
        Self {
            repo: repo.to_string(),
            tag: tag.to_string(),
        }
    }

    /// `repo:tag`, or just `repo` when no tag is set
    pub fn reference(&self) -> String {
        if self.tag.is_empty() {
            self.repo.clone()
        } else {
            format!("{}:{}", self.repo, self.tag)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceRequirements {
    pub mem: String,
    pub cpu: String,
}

impl ResourceRequirements {
    pub fn new(mem: &str, cpu: &str) -> Self {
        Self {
            mem: mem.to_string(),
            cpu: cpu.to_string(),
        }
    }
}
