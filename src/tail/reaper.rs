//! Idle-handle reaper.
//!
//! Closes the OS handle of any file that has produced no line for longer
//! than the idle timeout. The entry itself, with its cursor, stays in the
//! store; the next drain reopens it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::store::TrackedFileStore;

/// Close every open handle idle for longer than `idle` as of `now`.
///
/// Entries locked by a concurrent drain are skipped for this round.
/// Returns the number of handles closed.
pub fn sweep(store: &TrackedFileStore, idle: Duration, now: Instant) -> usize {
    let mut closed = 0;
    for entry in store.entries() {
        let Ok(mut file) = entry.try_lock() else {
            continue;
        };
        if file.is_open() && now.saturating_duration_since(file.last_activity()) > idle {
            file.close();
            closed += 1;
        }
    }
    closed
}

/// Sweep the store every `interval` until `cancel` fires.
pub async fn run_reaper(
    store: Arc<TrackedFileStore>,
    idle: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let closed = sweep(&store, idle, Instant::now());
                if closed > 0 {
                    tracing::debug!(closed, "Closed idle file handles");
                }
            }
        }
    }
    tracing::debug!("Reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderConfig;
    use crate::metrics::ThroughputCounter;
    use crate::tail::extract::LineExtractor;
    use crate::tail::identity::platform_resolver;
    use crate::tail::sink::ChannelSink;
    use crate::tail::state::StartPolicy;
    use std::io::Write;
    use tempfile::TempDir;

    fn store() -> TrackedFileStore {
        TrackedFileStore::new(platform_resolver(), HeaderConfig::default())
    }

    #[tokio::test]
    async fn test_sweep_closes_only_idle_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();
        let store = store();
        let entry = store.get_or_create(&path, StartPolicy::End).await.unwrap();

        let idle = Duration::from_secs(1);
        assert_eq!(sweep(&store, idle, Instant::now()), 0);
        assert!(entry.lock().await.is_open());

        let later = Instant::now() + Duration::from_secs(2);
        assert_eq!(sweep(&store, idle, later), 1);
        assert!(!entry.lock().await.is_open());
        assert_eq!(store.len(), 1);

        // Already closed handles are not counted again.
        assert_eq!(sweep(&store, idle, later), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_locked_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();
        let store = store();
        let entry = store.get_or_create(&path, StartPolicy::End).await.unwrap();

        let guard = entry.lock().await;
        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(sweep(&store, Duration::from_secs(1), later), 0);
        assert!(guard.is_open());
    }

    #[tokio::test]
    async fn test_idle_close_preserves_position() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "old\n").unwrap();
        let store = store();
        let entry = store.get_or_create(&path, StartPolicy::End).await.unwrap();

        let later = Instant::now() + Duration::from_secs(2);
        sweep(&store, Duration::from_secs(1), later);
        assert!(!entry.lock().await.is_open());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"new\n").unwrap();

        let (sink, mut rx) = ChannelSink::new(8);
        let extractor =
            LineExtractor::new(Arc::new(sink), Arc::new(ThroughputCounter::new("test")));
        extractor.drain(&mut *entry.lock().await).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().body_lossy(), "new");
        assert!(rx.try_recv().is_err());
        assert!(entry.lock().await.is_open());
    }

    #[tokio::test]
    async fn test_reaper_stops_on_cancel() {
        let store = Arc::new(store());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_reaper(
            Arc::clone(&store),
            Duration::from_secs(1),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
