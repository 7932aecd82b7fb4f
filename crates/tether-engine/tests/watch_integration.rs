//! File watcher integration tests against a real filesystem
//!
//! These exercise the OS watcher end to end: a write inside the source
//! tree must surface as a classified notification, rapid writes must
//! coalesce, and close must be idempotent.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;

use tether_core::config::{SessionConfig, SessionOptions};
use tether_core::state::ChangeKind;
use tether_core::traits::ChangeWatcher;
use tether_engine::FileWatcher;

fn config_for(source: &Path) -> SessionConfig {
    SessionOptions {
        host: Some("10.0.0.9".into()),
        username: Some("dev".into()),
        keyfile: Some("/tmp/id_ed25519".into()),
        source: Some(source.to_path_buf()),
        ..Default::default()
    }
    .resolve_with_env(|_| None)
    .unwrap()
}

async fn expect_change(rx: &mut mpsc::Receiver<ChangeKind>) -> ChangeKind {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a change notification")
        .expect("change stream ended unexpectedly")
}

#[tokio::test]
async fn test_source_write_emits_sync() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = FileWatcher::new(&config_for(dir.path()));
    let mut changes = watcher.start().await.unwrap();

    std::fs::write(dir.path().join("index.js"), "module.exports = 1\n").unwrap();

    assert_eq!(expect_change(&mut changes).await, ChangeKind::Sync);
    watcher.close().await;
}

#[tokio::test]
async fn test_manifest_write_emits_install() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = FileWatcher::new(&config_for(dir.path()));
    let mut changes = watcher.start().await.unwrap();

    std::fs::write(dir.path().join("package.json"), "{}\n").unwrap();

    assert_eq!(expect_change(&mut changes).await, ChangeKind::Install);
    watcher.close().await;
}

#[tokio::test]
async fn test_rapid_writes_coalesce_per_kind() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = FileWatcher::new(&config_for(dir.path()));
    let mut changes = watcher.start().await.unwrap();

    for i in 0..5 {
        std::fs::write(dir.path().join(format!("file-{i}.js")), "x\n").unwrap();
    }

    assert_eq!(expect_change(&mut changes).await, ChangeKind::Sync);
    // the burst lands in a single notification; the stream then goes quiet
    let quiet = tokio::time::timeout(Duration::from_millis(600), changes.recv()).await;
    assert!(quiet.is_err(), "expected the burst to coalesce, got {quiet:?}");
    watcher.close().await;
}

#[tokio::test]
async fn test_close_ends_the_stream_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = FileWatcher::new(&config_for(dir.path()));
    let mut changes = watcher.start().await.unwrap();

    watcher.close().await;
    watcher.close().await;

    let ended = tokio::time::timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("stream should end after close");
    assert_eq!(ended, None);
}
