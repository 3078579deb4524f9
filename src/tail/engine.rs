//! Engine lifecycle: wires roots, store, reaper and throughput sampler.

use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::error::TailError;
use super::extract::LineExtractor;
use super::identity::platform_resolver;
use super::reaper::run_reaper;
use super::registrar::WatchedRoot;
use super::sink::RecordSink;
use super::state::StartPolicy;
use super::store::TrackedFileStore;
use crate::config::{HeaderConfig, TailConfig, WatchDirConfig};
use crate::metrics::{run_sampler, MetricsRegistry, ThroughputCounter};

/// Default name of the counter group registered with the metrics registry.
pub const DEFAULT_ENGINE_NAME: &str = "dirtail";

/// Timing and header settings for one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Handles idle for longer than this are closed.
    pub idle_timeout: Duration,
    /// Reaper period.
    pub reap_interval: Duration,
    /// Throughput sampling period.
    pub throughput_interval: Duration,
    /// Notification batching window.
    pub debounce: Duration,
    pub headers: HeaderConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
            throughput_interval: Duration::from_secs(1),
            debounce: Duration::from_millis(100),
            headers: HeaderConfig::default(),
        }
    }
}

impl From<&TailConfig> for EngineOptions {
    fn from(config: &TailConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            reap_interval: config.reap_interval(),
            throughput_interval: config.throughput_interval(),
            debounce: config.debounce(),
            headers: config.headers.clone(),
        }
    }
}

/// Tails every file under a set of directory roots and hands each complete
/// line to a sink.
///
/// Files present at [`start`](Self::start) are tailed from their current
/// end; files created afterwards are read from the beginning.
pub struct TailEngine {
    name: String,
    roots: Vec<WatchDirConfig>,
    options: EngineOptions,
    sink: Arc<dyn RecordSink>,
    registry: Arc<dyn MetricsRegistry>,
    store: Arc<TrackedFileStore>,
    counter: Arc<ThroughputCounter>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for TailEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailEngine")
            .field("name", &self.name)
            .field("roots", &self.roots)
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TailEngine {
    #[must_use]
    pub fn new(
        roots: Vec<WatchDirConfig>,
        options: EngineOptions,
        sink: Arc<dyn RecordSink>,
        registry: Arc<dyn MetricsRegistry>,
    ) -> Self {
        let resolver = platform_resolver();
        tracing::debug!(identity = resolver.name(), "Selected file identity strategy");
        let store = Arc::new(TrackedFileStore::new(resolver, options.headers.clone()));
        Self {
            name: DEFAULT_ENGINE_NAME.to_string(),
            counter: Arc::new(ThroughputCounter::new(DEFAULT_ENGINE_NAME)),
            roots,
            options,
            sink,
            registry,
            store,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Use `name` for the counter group instead of the default.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.counter = Arc::new(ThroughputCounter::new(self.name.clone()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TrackedFileStore> {
        &self.store
    }

    #[must_use]
    pub fn counter(&self) -> &Arc<ThroughputCounter> {
        &self.counter
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Register the counter group, scan every root and spawn the background tasks.
    ///
    /// A root that cannot be watched is logged and left out; the others still
    /// start. Returns the number of roots being watched.
    pub async fn start(&mut self) -> usize {
        if self.is_running() {
            tracing::warn!(name = %self.name, "Engine already running");
            return 0;
        }

        self.registry.register(&self.name, Arc::clone(&self.counter));
        let extractor = LineExtractor::new(Arc::clone(&self.sink), Arc::clone(&self.counter));

        let mut active = 0;
        for root in self.roots.clone() {
            match self.start_root(root.clone(), extractor.clone()).await {
                Ok(true) => active += 1,
                Ok(false) => {
                    tracing::warn!(
                        root = %root.id,
                        path = %root.path.display(),
                        "Root could not be subscribed, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(root = %root.id, error = %e, "Failed to start watching root");
                }
            }
        }

        self.tasks.push(tokio::spawn(run_reaper(
            Arc::clone(&self.store),
            self.options.idle_timeout,
            self.options.reap_interval,
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(run_sampler(
            Arc::clone(&self.counter),
            self.options.throughput_interval,
            self.cancel.clone(),
        )));

        tracing::info!(
            name = %self.name,
            roots = active,
            files = self.store.len(),
            "Engine started"
        );
        active
    }

    async fn start_root(
        &mut self,
        root: WatchDirConfig,
        extractor: LineExtractor,
    ) -> Result<bool, TailError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = new_debouncer(
            self.options.debounce,
            None,
            move |result: DebounceEventResult| {
                let _ = tx.send(result);
            },
        )?;

        let watched = WatchedRoot::new(root, Box::new(debouncer));
        let mut dispatcher = Dispatcher::new(watched, Arc::clone(&self.store), extractor);
        dispatcher.register(StartPolicy::End).await;
        if !dispatcher.watched().is_active() {
            return Ok(false);
        }

        self.tasks
            .push(tokio::spawn(dispatcher.run(rx, self.cancel.clone())));
        Ok(true)
    }

    /// Stop every task, release every handle and deregister the counter group.
    ///
    /// Partial lines not yet terminated are dropped.
    pub async fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Engine task ended abnormally");
            }
        }

        let closed = self.store.close_all().await;
        tracing::info!(
            name = %self.name,
            closed,
            "stopped. Metrics: {}",
            self.counter.snapshot()
        );
        self.registry.deregister(&self.name);
        self.cancel = CancellationToken::new();
    }
}

impl Drop for TailEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
