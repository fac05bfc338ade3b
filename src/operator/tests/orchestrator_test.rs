//! WorkItem lifecycle driven step by step through the orchestrator

mod common;

use chrono::Duration as ChronoDuration;
use common::Fixture;
use prune_core::config::unversioned::FILTER_LABEL;
use prune_core::{ConfigMap, Duration, Node, Phase, PodPhase, PodTemplate, PruneConfig};
use prune_operator::template::{self, DESIRED_STATE_NAME, EXCLUSION_LABEL, TARGETS_KEY};
use prune_operator::{Action, ClusterClient, ReconcileError, RUNNING_REQUEUE};
use std::collections::BTreeMap;

fn config_with_ratio(ratio: f64) -> PruneConfig {
    let mut config = PruneConfig::default();
    config.image_job.success_ratio = ratio;
    config
}

// ============================================================================
// Submission
// ============================================================================

#[tokio::test]
async fn test_other_desired_state_names_are_ignored() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    fx.cluster.apply_desired_state("other", vec!["*".to_string()]);

    let action = fx.orchestrator.reconcile_desired_state("other").await.unwrap();

    assert_eq!(action, Action::done());
    assert!(fx.work_items().await.is_empty());
    assert_eq!(fx.cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_missing_desired_state_is_a_no_op() {
    let fx = Fixture::new(PruneConfig::default());
    let action = fx.orchestrator.bootstrap().await.unwrap();
    assert_eq!(action, Action::done());
    assert!(fx.work_items().await.is_empty());
}

#[tokio::test]
async fn test_submits_single_owned_work_item() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    fx.cluster
        .apply_desired_state(DESIRED_STATE_NAME, vec!["sha256:aaa".to_string()]);

    fx.orchestrator.bootstrap().await.unwrap();

    let desired = fx
        .cluster
        .get_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap()
        .unwrap();
    let item = fx.only_work_item().await;

    assert!(item.is_controlled_by(&desired.controller_ref()));
    assert!(item.name.starts_with(template::WORK_ITEM_PREFIX));
    assert_eq!(item.spec.desired_generation, 1);
    assert_eq!(desired.status.observed_generation, Some(1));

    // the target list is handed over to the WorkItem
    let targets = fx.cluster.list_owned_config_maps(&item.uid).await.unwrap();
    assert_eq!(targets.len(), 1);
    assert!(targets[0].immutable);
    assert_eq!(
        targets[0].data.get(TARGETS_KEY).map(String::as_str),
        Some(r#"["sha256:aaa"]"#)
    );
    assert!(fx
        .cluster
        .list_owned_config_maps(&desired.uid)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_running_item_requeues_without_resubmitting() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    fx.submit(&["*"]).await;

    for _ in 0..3 {
        let action = fx
            .orchestrator
            .reconcile_desired_state(DESIRED_STATE_NAME)
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(RUNNING_REQUEUE));
    }
    assert_eq!(fx.work_items().await.len(), 1);
}

#[tokio::test]
async fn test_exclusion_lists_are_mounted() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    let mut labels = BTreeMap::new();
    labels.insert(EXCLUSION_LABEL.to_string(), "true".to_string());
    fx.cluster
        .create_config_map(ConfigMap {
            name: "base-images".to_string(),
            labels,
            ..Default::default()
        })
        .await
        .unwrap();

    let item = fx.submit(&["*"]).await;

    assert!(item
        .spec
        .template
        .mounts
        .iter()
        .any(|m| m.config_map == "base-images" && m.mount_path == "/run/prune/excluded/base-images"));
}

#[tokio::test]
async fn test_more_than_one_owned_item_is_a_consistency_error() {
    let fx = Fixture::new(PruneConfig::default());
    let desired = fx
        .cluster
        .apply_desired_state(DESIRED_STATE_NAME, vec!["*".to_string()]);
    for _ in 0..2 {
        fx.cluster
            .create_work_item(template::work_item(&desired, PodTemplate::default()))
            .await
            .unwrap();
    }

    let result = fx.orchestrator.reconcile_desired_state(DESIRED_STATE_NAME).await;

    assert!(matches!(result, Err(ReconcileError::Consistency(_))));
    assert_eq!(fx.work_items().await.len(), 2);
}

// ============================================================================
// Fan-out and success ratio
// ============================================================================

#[tokio::test]
async fn test_fan_out_skips_filtered_nodes() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["linux-1", "linux-2"]);
    fx.cluster
        .add_node(Node::new("win-1").with_label("kubernetes.io/os", "windows"));
    fx.cluster
        .add_node(Node::new("opted-out").with_label(FILTER_LABEL, "true"));

    let item = fx.submit(&["*"]).await;

    assert_eq!(item.status.phase, Phase::Running);
    assert_eq!(item.status.desired, 2);
    assert_eq!(item.status.skipped, 2);

    let pods = fx.cluster.list_pods().await.unwrap();
    let mut nodes: Vec<_> = pods.iter().map(|p| p.node_name.as_str()).collect();
    nodes.sort();
    assert_eq!(nodes, vec!["linux-1", "linux-2"]);
    for pod in &pods {
        assert_eq!(
            pod.template.env.get(template::NODE_NAME_ENV),
            Some(&pod.node_name)
        );
    }

    // fanning out again does not duplicate pods
    let mut again = item.clone();
    again.status.phase = Phase::Pending;
    fx.cluster.update_work_item_status(&again).await.unwrap();
    fx.orchestrator.reconcile_work_item(&item.name).await.unwrap();
    assert_eq!(fx.cluster.pod_count(), 2);
}

#[tokio::test]
async fn test_item_waits_for_every_pod() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1", "n2"]);
    let item = fx.submit(&["*"]).await;

    let mut pods = fx.cluster.list_pods().await.unwrap();
    pods[0].phase = PodPhase::Succeeded;
    fx.cluster.update_pod(&pods[0]).await.unwrap();
    fx.orchestrator.reconcile_work_item(&item.name).await.unwrap();

    let item = fx.cluster.get_work_item(&item.name).await.unwrap().unwrap();
    assert_eq!(item.status.phase, Phase::Running);
    assert_eq!(item.status.succeeded, 1);
}

#[tokio::test]
async fn test_full_success_meets_ratio() {
    let fx = Fixture::new(config_with_ratio(0.8)).with_nodes(&["n1", "n2"]);
    let item = fx.submit(&["*"]).await;

    let item = fx
        .finish_pods(&item, &[PodPhase::Succeeded, PodPhase::Succeeded])
        .await;

    assert_eq!(item.status.phase, Phase::Completed);
    assert_eq!(item.status.succeeded, 2);
}

#[tokio::test]
async fn test_half_success_misses_ratio() {
    let fx = Fixture::new(config_with_ratio(0.8)).with_nodes(&["n1", "n2"]);
    let item = fx.submit(&["*"]).await;

    let item = fx
        .finish_pods(&item, &[PodPhase::Succeeded, PodPhase::Failed])
        .await;

    assert_eq!(item.status.phase, Phase::Failed);
    assert_eq!(item.status.succeeded, 1);
    assert_eq!(item.status.failed, 1);
}

#[tokio::test]
async fn test_no_eligible_nodes_completes() {
    let fx = Fixture::new(PruneConfig::default());
    let item = fx.submit(&["*"]).await;

    assert_eq!(item.status.phase, Phase::Completed);
    assert_eq!(item.status.desired, 0);
}

// ============================================================================
// Terminal handling and cleanup
// ============================================================================

#[tokio::test]
async fn test_delete_after_written_once_and_honoured() {
    let mut config = PruneConfig::default();
    config.image_job.cleanup.delay_on_success = Duration::from_secs(600);
    let fx = Fixture::new(config).with_nodes(&["n1", "n2"]);
    let t0 = prune_operator::Clock::now(fx.clock.as_ref());

    let item = fx.submit(&["*"]).await;
    fx.finish_pods(&item, &[PodPhase::Succeeded, PodPhase::Succeeded])
        .await;

    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(std::time::Duration::from_secs(600)));

    let stamped = fx.only_work_item().await.status.delete_after;
    assert_eq!(stamped, Some(t0 + ChronoDuration::minutes(10)));

    let desired = fx
        .cluster
        .get_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(desired.status.success, 2);
    assert_eq!(desired.status.failed, 0);
    assert_eq!(desired.status.skipped, 0);
    assert_eq!(desired.status.timestamp, Some(t0));

    fx.clock.advance(ChronoDuration::minutes(4));
    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(std::time::Duration::from_secs(360)));
    assert_eq!(fx.only_work_item().await.status.delete_after, stamped);

    fx.clock.advance(ChronoDuration::minutes(6));
    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(action, Action::done());
    assert!(fx.work_items().await.is_empty());
    assert_eq!(fx.cluster.pod_count(), 0);
    assert!(fx
        .cluster
        .list_owned_config_maps(&item.uid)
        .await
        .unwrap()
        .is_empty());

    // same generation: nothing is resubmitted
    fx.orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert!(fx.work_items().await.is_empty());
}

#[tokio::test]
async fn test_failed_item_uses_failure_delay() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    let item = fx.submit(&["*"]).await;
    fx.finish_pods(&item, &[PodPhase::Failed]).await;

    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();

    assert_eq!(
        action,
        Action::requeue(std::time::Duration::from_secs(24 * 3600))
    );
    let desired = fx
        .cluster
        .get_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(desired.status.failed, 1);
}

#[tokio::test]
async fn test_delay_past_calendar_end_keeps_item() {
    let mut config = PruneConfig::default();
    config.image_job.cleanup.delay_on_failure = Duration::from_secs(Duration::MAX_SECS);
    let fx = Fixture::new(config).with_nodes(&["n1"]);
    let item = fx.submit(&["*"]).await;
    fx.finish_pods(&item, &[PodPhase::Failed]).await;

    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert!(action.requeue_after.is_some());

    let stored = fx.only_work_item().await;
    assert_eq!(
        stored.status.delete_after,
        Some(chrono::DateTime::<chrono::Utc>::MAX_UTC)
    );

    // a later pass neither panics nor removes the item
    fx.clock.advance(ChronoDuration::days(365));
    fx.orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(fx.work_items().await.len(), 1);
}

#[tokio::test]
async fn test_job_metrics_recorded_once() {
    let mut config = config_with_ratio(0.8);
    config.image_job.cleanup.delay_on_success = Duration::from_secs(60);
    let fx = Fixture::new(config).with_nodes(&["n1", "n2"]);
    let item = fx.submit(&["*"]).await;
    fx.clock.advance(ChronoDuration::seconds(2));
    fx.finish_pods(&item, &[PodPhase::Succeeded, PodPhase::Succeeded])
        .await;

    for _ in 0..3 {
        fx.orchestrator
            .reconcile_desired_state(DESIRED_STATE_NAME)
            .await
            .unwrap();
    }

    let snapshot = fx.registry.snapshot();
    assert_eq!(snapshot.imagejob_completed, 1);
    assert_eq!(snapshot.imagejob_failed, 0);
    assert_eq!(snapshot.pods_completed, 2);
    assert_eq!(snapshot.pods_failed, 0);
    assert_eq!(snapshot.imagejob_duration_count, 1);
    assert_eq!(snapshot.imagejob_duration_sum_ms, 2000.0);
}

#[tokio::test]
async fn test_spec_change_while_running_is_submitted_after_cleanup() {
    let fx = Fixture::new(PruneConfig::default()).with_nodes(&["n1"]);
    let first = fx.submit(&["sha256:aaa"]).await;

    fx.cluster
        .apply_desired_state(DESIRED_STATE_NAME, vec!["sha256:bbb".to_string()]);
    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(RUNNING_REQUEUE));

    fx.finish_pods(&first, &[PodPhase::Succeeded]).await;
    fx.orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();

    let second = fx.only_work_item().await;
    assert_ne!(second.name, first.name);
    assert_eq!(second.spec.desired_generation, 2);
    let targets = fx.cluster.list_owned_config_maps(&second.uid).await.unwrap();
    assert_eq!(
        targets[0].data.get(TARGETS_KEY).map(String::as_str),
        Some(r#"["sha256:bbb"]"#)
    );
}

#[tokio::test]
async fn test_conflict_fails_reconcile_without_duplicate_submission() {
    let fx = Fixture::new(PruneConfig::default());
    fx.cluster
        .apply_desired_state(DESIRED_STATE_NAME, vec!["*".to_string()]);

    fx.cluster.inject_conflicts(1);
    let result = fx.orchestrator.reconcile_desired_state(DESIRED_STATE_NAME).await;
    assert!(result.unwrap_err().is_conflict());

    // the retried reconcile finds the item it already created
    let action = fx
        .orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(RUNNING_REQUEUE));
    let item = fx.only_work_item().await;

    fx.orchestrator.reconcile_work_item(&item.name).await.unwrap();
    fx.orchestrator
        .reconcile_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap();

    let desired = fx
        .cluster
        .get_desired_state(DESIRED_STATE_NAME)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(desired.status.observed_generation, Some(1));
    assert!(fx.work_items().await.is_empty());
    assert!(fx
        .cluster
        .list_owned_config_maps(&desired.uid)
        .await
        .unwrap()
        .is_empty());
}
