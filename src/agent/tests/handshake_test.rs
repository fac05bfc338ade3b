//! Tests for the collect/remove handshake and exclusion directory loading

mod common;

use common::FakeInventory;
use prune_agent::handshake::{create_pipe, signal, wait_for_marker, COLLECT_COMPLETE};
use prune_agent::{collect_non_running, AgentError, ExclusionSet, Handshake};
use prune_core::ImageRecord;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Markers
// ============================================================================

#[tokio::test]
async fn test_marker_in_plain_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("collect");
    std::fs::write(&path, COLLECT_COMPLETE).unwrap();

    wait_for_marker(&path, COLLECT_COMPLETE, TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_garbage_marker_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("collect");
    std::fs::write(&path, "collect-complete\n").unwrap();

    let result = wait_for_marker(&path, COLLECT_COMPLETE, TIMEOUT).await;
    assert!(matches!(result, Err(AgentError::Corruption(_))));
}

#[tokio::test]
async fn test_marker_through_fifo() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("erase");
    create_pipe(&path).unwrap();
    // creating twice reuses the pipe
    create_pipe(&path).unwrap();

    let writer_path = path.clone();
    let writer =
        tokio::spawn(async move { signal(&writer_path, "erase-complete", TIMEOUT).await });

    wait_for_marker(&path, "erase-complete", TIMEOUT).await.unwrap();
    writer.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wait_times_out_without_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("collect");
    create_pipe(&path).unwrap();

    let result = wait_for_marker(&path, COLLECT_COMPLETE, Duration::from_millis(50)).await;
    assert!(matches!(result, Err(AgentError::Timeout(_))));

    // unblock the reader left on the blocking pool
    std::fs::OpenOptions::new().write(true).open(&path).unwrap();
}

// ============================================================================
// Collector -> remover
// ============================================================================

#[tokio::test]
async fn test_collector_hands_images_to_remover() {
    let dir = TempDir::new().unwrap();
    let inventory = FakeInventory::new()
        .with_image("sha256:aaa", &["nginx:latest"])
        .with_image("sha256:bbb", &["redis:latest", "redis:7"])
        .with_container("c1", "nginx:latest");

    let collector = Handshake::new(dir.path(), TIMEOUT);
    let remover = Handshake::new(dir.path(), TIMEOUT);
    collector.prepare().unwrap();
    remover.prepare().unwrap();

    let images = collect_non_running(&inventory, TIMEOUT).await.unwrap();
    assert_eq!(
        images,
        vec![ImageRecord::new("sha256:bbb", Some("redis:latest".to_string()))]
    );

    let publish = tokio::spawn(async move {
        collector.publish_images(&images).await?;
        collector.await_erase().await
    });

    let received = remover.receive_images().await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].digest, "sha256:bbb");

    remover.finish_erase().await.unwrap();
    publish.await.unwrap().unwrap();
}

// ============================================================================
// Exclusion directory
// ============================================================================

#[test]
fn test_missing_exclusion_dir_is_empty() {
    let set = ExclusionSet::load_dir("/nonexistent/prune/excluded").unwrap();
    assert!(set.is_empty());
}

#[test]
fn test_exclusion_dir_with_mounted_configmaps() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("base-images");
    let team = dir.path().join("team");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::create_dir_all(team.join("..data")).unwrap();

    std::fs::write(base.join("patterns"), "# keep\nredis:*\n\ndocker.io/library/*\n").unwrap();
    std::fs::write(team.join("excluded.json"), r#"{"excluded": ["internal/*"]}"#).unwrap();
    // payload directories are skipped; their keys appear as separate files
    std::fs::write(team.join("..data").join("excluded.json"), "ignored:*").unwrap();

    let set = ExclusionSet::load_dir(dir.path()).unwrap();
    assert_eq!(set.len(), 3);
    assert!(set.is_excluded("redis:7", "sha256:aaa", &[]));
    assert!(set.is_excluded("internal/app:1", "sha256:bbb", &[]));
    assert!(!set.is_excluded("ignored:1", "sha256:ccc", &[]));
}
