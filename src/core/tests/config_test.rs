//! Unit tests for manager configuration
//!
//! Tests for apiVersion dispatch, defaults, duration parsing and the
//! versioned <-> unversioned conversions.

use prune_core::config::{
    parse_config, v1alpha2, v1alpha3, FilterKind, API_VERSION_V1ALPHA2, API_VERSION_V1ALPHA3,
};
use prune_core::{load_config, CoreError, Duration, PruneConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_minimal_document_takes_defaults() {
    let config = parse_config("apiVersion: prune.dev/v1alpha3\n").unwrap();
    assert_eq!(config, PruneConfig::default());

    assert_eq!(config.runtime, "containerd");
    assert_eq!(config.image_job.success_ratio, 1.0);
    assert_eq!(config.image_job.cleanup.delay_on_success, Duration::ZERO);
    assert_eq!(
        config.image_job.cleanup.delay_on_failure,
        Duration::from_hours(24)
    );
    assert_eq!(config.scheduling.repeat_interval, Duration::from_hours(24));
    assert_eq!(config.node_filter.kind, FilterKind::Exclude);
    assert_eq!(
        config.node_filter.selectors,
        vec![
            "prune.dev/cleanup.filter".to_string(),
            "kubernetes.io/os=windows".to_string()
        ]
    );
    assert_eq!(
        config.components.remover.image.reference(),
        "ghcr.io/prune-dev/remover:v1.0.0"
    );
}

#[test]
fn test_v1alpha3_document() {
    let yaml = r#"
apiVersion: prune.dev/v1alpha3
runtime:
  name: cri-o
  address: unix:///var/run/crio/crio.sock
logLevel: debug
imageJob:
  successRatio: 0.8
  cleanup:
    delayOnSuccess: 5m
    delayOnFailure: 2h
nodeFilter:
  type: include
  selectors:
    - pool=batch
pullSecrets:
  - regcred
components:
  remover:
    image:
      repo: registry.local/remover
      tag: dev
    request:
      mem: 50Mi
      cpu: 10m
"#;
    let config = parse_config(yaml).unwrap();

    assert_eq!(config.runtime, "cri-o");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.image_job.success_ratio, 0.8);
    assert_eq!(
        config.image_job.cleanup.delay_on_success,
        Duration::from_secs(300)
    );
    assert_eq!(
        config.image_job.cleanup.delay_on_failure,
        Duration::from_hours(2)
    );
    assert_eq!(config.node_filter.kind, FilterKind::Include);
    assert_eq!(config.node_filter.selectors, vec!["pool=batch".to_string()]);
    assert_eq!(config.pull_secrets, vec!["regcred".to_string()]);
    assert_eq!(
        config.components.remover.image.reference(),
        "registry.local/remover:dev"
    );
    assert_eq!(config.components.remover.request.mem, "50Mi");
    // Sections that were not written keep their defaults
    assert_eq!(config.scheduling.repeat_interval, Duration::from_hours(24));
    assert!(!config.components.collector.enabled);
}

#[test]
fn test_v1alpha2_runtime_is_a_name() {
    let yaml = r#"
apiVersion: prune.dev/v1alpha2
runtime: docker
scheduling:
  repeatInterval: 12h
  beginImmediately: false
"#;
    let config = parse_config(yaml).unwrap();
    assert_eq!(config.runtime, "docker");
    assert_eq!(config.scheduling.repeat_interval, Duration::from_hours(12));
    assert!(!config.scheduling.begin_immediately);
}

#[test]
fn test_unknown_or_missing_api_version() {
    let result = parse_config("apiVersion: prune.dev/v9\n");
    assert!(matches!(result, Err(CoreError::UnsupportedVersion(v)) if v == "prune.dev/v9"));

    let result = parse_config("runtime: containerd\n");
    assert!(matches!(result, Err(CoreError::Config(_))));
}

#[test]
fn test_invalid_duration_is_rejected() {
    let yaml = r#"
apiVersion: prune.dev/v1alpha2
imageJob:
  cleanup:
    delayOnFailure: soon
"#;
    assert!(parse_config(yaml).is_err());
}

#[test]
fn test_oversized_duration_is_rejected() {
    for delay in ["10000000000000000s", "9999999999999999h", "10000000000000000"] {
        let yaml = format!(
            "apiVersion: prune.dev/v1alpha3\nimageJob:\n  cleanup:\n    delayOnFailure: {}\n",
            delay
        );
        assert!(parse_config(&yaml).is_err(), "{} was accepted", delay);
    }
}

#[test]
fn test_v1alpha3_round_trip_drops_runtime_address() {
    let versioned = v1alpha3::ManagerConfig {
        runtime: v1alpha3::RuntimeSpec {
            name: "containerd".to_string(),
            address: "unix:///custom.sock".to_string(),
        },
        ..Default::default()
    };

    let unversioned: PruneConfig = versioned.into();
    assert_eq!(unversioned.runtime, "containerd");

    let back: v1alpha3::ManagerConfig = unversioned.into();
    assert_eq!(back.api_version, API_VERSION_V1ALPHA3);
    assert_eq!(back.runtime.name, "containerd");
    assert_eq!(back.runtime.address, "");
}

#[test]
fn test_conversion_preserves_every_field() {
    let mut config = PruneConfig::default();
    config.runtime = "cri-o".to_string();
    config.otlp_endpoint = "collector:4318".to_string();
    config.priority_class_name = "system-node-critical".to_string();
    config.profile.enabled = true;
    config.components.collector.enabled = true;
    config.components.remover.config = Some("verbose: true".to_string());

    let v2: v1alpha2::ManagerConfig = config.clone().into();
    assert_eq!(v2.api_version, API_VERSION_V1ALPHA2);
    let from_v2: PruneConfig = v2.into();
    assert_eq!(from_v2, config);

    let v3: v1alpha3::ManagerConfig = config.clone().into();
    let from_v3: PruneConfig = v3.into();
    assert_eq!(from_v3, config);
}

#[test]
fn test_load_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "apiVersion: prune.dev/v1alpha3").unwrap();
    writeln!(file, "otlpEndpoint: otel:4318").unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.otlp_endpoint, "otel:4318");

    assert!(load_config("/nonexistent/prune.yaml").is_err());
}
