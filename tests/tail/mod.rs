//! Engine-level tailing tests against real filesystem notifications.

mod rotation_test;
mod scenario_test;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dirtail::config::{HeaderConfig, WatchDirConfig};
use dirtail::metrics::InMemoryRegistry;
use dirtail::tail::{ChannelSink, EngineOptions, Record, TailEngine};
use tokio::sync::mpsc;

/// Upper bound on any single wait for a notification to be processed.
pub const WAIT: Duration = Duration::from_secs(10);

pub fn fast_options(idle_timeout: Duration) -> EngineOptions {
    EngineOptions {
        idle_timeout,
        reap_interval: Duration::from_millis(50),
        throughput_interval: Duration::from_millis(100),
        debounce: Duration::from_millis(50),
        headers: HeaderConfig::default(),
    }
}

pub async fn started_engine(
    roots: Vec<WatchDirConfig>,
    options: EngineOptions,
) -> (TailEngine, mpsc::Receiver<Record>, Arc<InMemoryRegistry>) {
    let (sink, rx) = ChannelSink::new(1024);
    let registry = Arc::new(InMemoryRegistry::new());
    let mut engine = TailEngine::new(roots, options, Arc::new(sink), registry.clone());
    engine.start().await;
    // Let the OS subscriptions settle before the test starts writing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    (engine, rx, registry)
}

pub async fn next_body(rx: &mut mpsc::Receiver<Record>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a record")
        .expect("sink closed")
        .body_lossy()
}

/// Assert nothing else arrives within `quiet`.
pub async fn assert_no_more(rx: &mut mpsc::Receiver<Record>, quiet: Duration) {
    if let Ok(Some(record)) = tokio::time::timeout(quiet, rx.recv()).await {
        panic!("unexpected record: {}", record.body_lossy());
    }
}

/// Poll `check` until it holds or the wait expires.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn append(path: &Path, content: &str) {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

/// Verify the tailing API is reachable from the crate root.
#[test]
fn test_tail_types_exported() {
    use dirtail::tail::{
        classify, platform_resolver, resume_from_tail, sweep, Change, FileIdentity, SinkError,
        StartPolicy, TailError, TrackedFileStore,
    };

    let store = TrackedFileStore::new(platform_resolver(), HeaderConfig::default());
    assert!(store.is_empty());
    let _ = StartPolicy::ResumeFromTail;
    let _: fn() -> SinkError = || SinkError::Closed;
    let _: fn() -> TailError = || TailError::FileVanished("x".into());
    let _ = FileIdentity::Path("x".into());
    let _: Option<Change> = None;
    let _ = classify;
    let _ = sweep;
    let _ = resume_from_tail;
}
