//! End-to-end behavior of a single watched directory.

use std::time::Duration;

use dirtail::config::{HeaderConfig, WatchDirConfig};
use dirtail::metrics::COUNTER_MESSAGE_SENT;
use dirtail::tail::DEFAULT_ENGINE_NAME;
use regex::Regex;
use tempfile::TempDir;

use super::{append, assert_no_more, eventually, fast_options, next_body, started_engine};

#[tokio::test]
async fn test_append_idle_close_and_resume() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx, registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_millis(400)),
    )
    .await;

    let path = dir.path().join("a.log");
    std::fs::write(&path, "x\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "x");

    append(&path, "y\n");
    assert_eq!(next_body(&mut rx).await, "y");
    let counter = engine.counter().clone();
    eventually(|| {
        let counter = counter.clone();
        async move { counter.sent() == 2 }
    })
    .await;

    let store = engine.store().clone();
    eventually(|| {
        let store = store.clone();
        async move {
            let entries = store.entries();
            let mut all_closed = !entries.is_empty();
            for entry in entries {
                all_closed &= !entry.lock().await.is_open();
            }
            all_closed
        }
    })
    .await;

    append(&path, "z\n");
    assert_eq!(next_body(&mut rx).await, "z");
    assert_no_more(&mut rx, Duration::from_millis(300)).await;

    let snapshot = registry.snapshot(DEFAULT_ENGINE_NAME).unwrap();
    assert_eq!(snapshot.attribute(COUNTER_MESSAGE_SENT), Some(3));
    engine.stop().await;
}

#[tokio::test]
async fn test_existing_content_is_not_replayed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.log");
    std::fs::write(&path, "history 1\nhistory 2\n").unwrap();

    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    append(&path, "fresh\n");
    assert_eq!(next_body(&mut rx).await, "fresh");
    assert_no_more(&mut rx, Duration::from_millis(200)).await;
    engine.stop().await;
}

#[tokio::test]
async fn test_partial_line_waits_for_terminator() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    let path = dir.path().join("a.log");
    std::fs::write(&path, "a\nb\nc").unwrap();
    assert_eq!(next_body(&mut rx).await, "a");
    assert_eq!(next_body(&mut rx).await, "b");
    assert_no_more(&mut rx, Duration::from_millis(300)).await;

    append(&path, "\n");
    assert_eq!(next_body(&mut rx).await, "c");
    engine.stop().await;
}

#[tokio::test]
async fn test_nested_directories_and_runtime_subdirectories() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("deep/er")).unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    std::fs::write(dir.path().join("deep/er/a.log"), "deep\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "deep");

    let late = dir.path().join("late");
    std::fs::create_dir(&late).unwrap();
    std::fs::write(late.join("b.log"), "late\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "late");

    append(&late.join("b.log"), "later\n");
    assert_eq!(next_body(&mut rx).await, "later");
    engine.stop().await;
}

#[tokio::test]
async fn test_filename_pattern_and_headers() {
    let dir = TempDir::new().unwrap();
    let mut options = fast_options(Duration::from_secs(60));
    options.headers = HeaderConfig {
        basename_header: true,
        ..Default::default()
    };
    let root = WatchDirConfig::new("d", dir.path()).with_pattern(Regex::new(r"\.log$").unwrap());
    let (mut engine, mut rx, _registry) = started_engine(vec![root], options).await;

    std::fs::write(dir.path().join("skip.txt"), "nope\n").unwrap();
    std::fs::write(dir.path().join("keep.log"), "yes\n").unwrap();

    let record = tokio::time::timeout(super::WAIT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.body_lossy(), "yes");
    assert_eq!(record.headers["basename"], "keep.log");
    assert_no_more(&mut rx, Duration::from_millis(300)).await;
    engine.stop().await;
}

#[tokio::test]
async fn test_deleted_file_leaves_store_and_recreate_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    let path = dir.path().join("a.log");
    std::fs::write(&path, "one\ntwo\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "one");
    assert_eq!(next_body(&mut rx).await, "two");

    std::fs::remove_file(&path).unwrap();
    let store = engine.store().clone();
    let gone = path.clone();
    eventually(|| {
        let store = store.clone();
        let gone = gone.clone();
        async move { !store.contains_path(&gone) }
    })
    .await;

    std::fs::write(&path, "three\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "three");
    engine.stop().await;
}

#[tokio::test]
async fn test_stop_closes_everything_and_deregisters() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.log"), "x\n").unwrap();
    let (mut engine, _rx, registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;
    assert_eq!(registry.names(), vec![DEFAULT_ENGINE_NAME.to_string()]);

    engine.stop().await;
    assert!(!engine.is_running());
    assert!(registry.names().is_empty());
    for entry in engine.store().entries() {
        assert!(!entry.lock().await.is_open());
    }
}
