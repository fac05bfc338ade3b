//! `prune.dev/v1alpha3` manager configuration.
//!
//! Differs from v1alpha2 only in the runtime field, which carries an explicit
//! socket address next to the runtime name.

use super::unversioned as u;
use super::{Duration, FilterKind, API_VERSION_V1ALPHA3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagerConfig {
    pub api_version: String,
    pub runtime: RuntimeSpec,
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

impl Default for ManagerConfig {
    fn default() -> Self {
        u::PruneConfig::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeSpec {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scheduling {
    pub repeat_interval: Duration,
    pub begin_immediately: bool,
}

impl Default for Scheduling {
    fn default() -> Self {
        u::Scheduling::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub enabled: bool,
    pub port: u16,
}

impl Default for Profile {
    fn default() -> Self {
        u::Profile::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageJob {
    pub success_ratio: f64,
    pub cleanup: ImageJobCleanup,
}

impl Default for ImageJob {
    fn default() -> Self {
        u::ImageJob::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageJobCleanup {
    pub delay_on_success: Duration,
    pub delay_on_failure: Duration,
}

impl Default for ImageJobCleanup {
    fn default() -> Self {
        u::ImageJobCleanup::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFilter {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub selectors: Vec<String>,
}

impl Default for NodeFilter {
    fn default() -> Self {
        u::NodeFilter::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Components {
    pub collector: OptionalContainerConfig,
    pub scanner: OptionalContainerConfig,
    pub remover: ContainerConfig,
}

impl Default for Components {
    fn default() -> Self {
        u::Components::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OptionalContainerConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub container: ContainerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: RepoTag,
    pub request: ResourceRequirements,
    pub limit: ResourceRequirements,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        u::ContainerConfig::default().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RepoTag {
    pub repo: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceRequirements {
    pub mem: String,
    pub cpu: String,
}

// ============================================================================
// Conversions to the unversioned form
// ============================================================================

impl From<ManagerConfig> for u::PruneConfig {
    fn from(c: ManagerConfig) -> Self {
        Self {
            runtime: c.runtime.name,
            otlp_endpoint: c.otlp_endpoint,
            log_level: c.log_level,
            scheduling: c.scheduling.into(),
            profile: c.profile.into(),
            image_job: c.image_job.into(),
            pull_secrets: c.pull_secrets,
            priority_class_name: c.priority_class_name,
            node_filter: c.node_filter.into(),
            components: c.components.into(),
        }
    }
}

impl From<Scheduling> for u::Scheduling {
    fn from(s: Scheduling) -> Self {
        Self {
            repeat_interval: s.repeat_interval,
            begin_immediately: s.begin_immediately,
        }
    }
}

impl From<Profile> for u::Profile {
    fn from(p: Profile) -> Self {
        Self {
            enabled: p.enabled,
            port: p.port,
        }
    }
}

impl From<ImageJob> for u::ImageJob {
    fn from(j: ImageJob) -> Self {
        Self {
            success_ratio: j.success_ratio,
            cleanup: u::ImageJobCleanup {
                delay_on_success: j.cleanup.delay_on_success,
                delay_on_failure: j.cleanup.delay_on_failure,
            },
        }
    }
}

impl From<NodeFilter> for u::NodeFilter {
    fn from(f: NodeFilter) -> Self {
        Self {
            kind: f.kind,
            selectors: f.selectors,
        }
    }
}

impl From<Components> for u::Components {
    fn from(c: Components) -> Self {
        Self {
            collector: c.collector.into(),
            scanner: c.scanner.into(),
            remover: c.remover.into(),
        }
    }
}

impl From<OptionalContainerConfig> for u::OptionalContainerConfig {
    fn from(o: OptionalContainerConfig) -> Self {
        Self {
            enabled: o.enabled,
            container: o.container.into(),
        }
    }
}

impl From<ContainerConfig> for u::ContainerConfig {
    fn from(c: ContainerConfig) -> Self {
        Self {
            image: u::RepoTag {
                repo: c.image.repo,
                tag: c.image.tag,
            },
            request: u::ResourceRequirements {
                mem: c.request.mem,
                cpu: c.request.cpu,
            },
            limit: u::ResourceRequirements {
                mem: c.limit.mem,
                cpu: c.limit.cpu,
            },
            config: c.config,
        }
    }
}

// ============================================================================
// Conversions from the unversioned form
// ============================================================================

impl From<u::PruneConfig> for ManagerConfig {
    fn from(c: u::PruneConfig) -> Self {
        Self {
            api_version: API_VERSION_V1ALPHA3.to_string(),
            runtime: RuntimeSpec {
                name: c.runtime,
                address: String::new(),
            },
            otlp_endpoint: c.otlp_endpoint,
            log_level: c.log_level,
            scheduling: c.scheduling.into(),
            profile: c.profile.into(),
            image_job: c.image_job.into(),
            pull_secrets: c.pull_secrets,
            priority_class_name: c.priority_class_name,
            node_filter: c.node_filter.into(),
            components: c.components.into(),
        }
    }
}

impl From<u::Scheduling> for Scheduling {
    fn from(s: u::Scheduling) -> Self {
        Self {
            repeat_interval: s.repeat_interval,
            begin_immediately: s.begin_immediately,
        }
    }
}

impl From<u::Profile> for Profile {
    fn from(p: u::Profile) -> Self {
        Self {
            enabled: p.enabled,
            port: p.port,
        }
    }
}

impl From<u::ImageJob> for ImageJob {
    fn from(j: u::ImageJob) -> Self {
        Self {
            success_ratio: j.success_ratio,
            cleanup: j.cleanup.into(),
        }
    }
}

impl From<u::ImageJobCleanup> for ImageJobCleanup {
    fn from(c: u::ImageJobCleanup) -> Self {
        Self {
            delay_on_success: c.delay_on_success,
            delay_on_failure: c.delay_on_failure,
        }
    }
}

impl From<u::NodeFilter> for NodeFilter {
    fn from(f: u::NodeFilter) -> Self {
        Self {
            kind: f.kind,
            selectors: f.selectors,
        }
    }
}

impl From<u::Components> for Components {
    fn from(c: u::Components) -> Self {
        Self {
            collector: c.collector.into(),
            scanner: c.scanner.into(),
            remover: c.remover.into(),
        }
    }
}

impl From<u::OptionalContainerConfig> for OptionalContainerConfig {
    fn from(o: u::OptionalContainerConfig) -> Self {
        Self {
            enabled: o.enabled,
            container: o.container.into(),
        }
    }
}

impl From<u::ContainerConfig> for ContainerConfig {
    fn from(c: u::ContainerConfig) -> Self {
        Self {
            image: RepoTag {
                repo: c.image.repo,
                tag: c.image.tag,
            },
            request: ResourceRequirements {
                mem: c.request.mem,
                cpu: c.request.cpu,
            },
            limit: ResourceRequirements {
                mem: c.limit.mem,
                cpu: c.limit.cpu,
            },
            config: c.config,
        }
    }
}
