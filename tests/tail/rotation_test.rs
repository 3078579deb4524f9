//! Rotation: truncation, copy-truncate and rename-and-recreate.

use std::time::Duration;

use dirtail::config::WatchDirConfig;
use tempfile::TempDir;

use super::{append, assert_no_more, fast_options, next_body, started_engine};

#[tokio::test]
async fn test_truncate_resumes_without_replay() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "pre\n").unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    append(&path, "one\n");
    assert_eq!(next_body(&mut rx).await, "one");

    std::fs::write(&path, "fresh\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "fresh");
    assert_no_more(&mut rx, Duration::from_millis(300)).await;
    engine.stop().await;
}

#[tokio::test]
async fn test_truncate_while_idle_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "").unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_millis(100)),
    )
    .await;

    append(&path, "aaaaaaaa\nbbbbbbbb\n");
    assert_eq!(next_body(&mut rx).await, "aaaaaaaa");
    assert_eq!(next_body(&mut rx).await, "bbbbbbbb");

    // Well past the idle timeout so the handle is closed.
    tokio::time::sleep(Duration::from_millis(400)).await;
    std::fs::write(&path, "new\n").unwrap();
    assert_eq!(next_body(&mut rx).await, "new");
    assert_no_more(&mut rx, Duration::from_millis(300)).await;
    engine.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_rename_and_recreate_loses_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.log");
    let rotated = dir.path().join("app.log.1");
    std::fs::write(&path, "").unwrap();
    let (mut engine, mut rx, _registry) = started_engine(
        vec![WatchDirConfig::new("d", dir.path())],
        fast_options(Duration::from_secs(60)),
    )
    .await;

    append(&path, "before\n");
    assert_eq!(next_body(&mut rx).await, "before");

    append(&path, "last\n");
    std::fs::rename(&path, &rotated).unwrap();
    std::fs::write(&path, "first\n").unwrap();

    let mut bodies = vec![next_body(&mut rx).await, next_body(&mut rx).await];
    bodies.sort();
    assert_eq!(bodies, vec!["first", "last"]);
    assert_no_more(&mut rx, Duration::from_millis(300)).await;

    append(&rotated, "straggler\n");
    assert_eq!(next_body(&mut rx).await, "straggler");
    engine.stop().await;
}
