//! Send/failure counters with derived throughput.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Records successfully handed to the sink.
pub const COUNTER_MESSAGE_SENT: &str = "source.counter.message.sent";
/// Records whose hand-off failed.
pub const COUNTER_MESSAGE_SENT_ERROR: &str = "source.counter.message.sent.error";
/// Records sent during the last sampling interval.
pub const CURRENT_THROUGHPUT: &str = "source.current.throughput";
/// Records sent per second since the counter was created.
pub const AVERAGE_THROUGHPUT: &str = "source.average.throughput";

/// Monotonic send counters plus throughput derived by periodic sampling.
///
/// The derived values are diagnostic only and never gate behavior.
#[derive(Debug)]
pub struct ThroughputCounter {
    name: String,
    started_at: Instant,
    sent: AtomicU64,
    failed: AtomicU64,
    previous: AtomicU64,
    current: AtomicU64,
    average: AtomicU64,
}

impl ThroughputCounter {
    /// Create a counter group named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Instant::now(),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            previous: AtomicU64::new(0),
            current: AtomicU64::new(0),
            average: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn increment_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_throughput(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn average_throughput(&self) -> u64 {
        self.average.load(Ordering::Relaxed)
    }

    /// Take one throughput sample now.
    pub fn sample(&self) {
        self.sample_at(Instant::now());
    }

    /// Take one throughput sample as of `now`.
    ///
    /// Current throughput is the growth of `sent` since the previous sample;
    /// average throughput is `sent` over whole seconds elapsed since creation.
    pub fn sample_at(&self, now: Instant) {
        let sent = self.sent();
        let previous = self.previous.swap(sent, Ordering::Relaxed);
        self.current
            .store(sent.saturating_sub(previous), Ordering::Relaxed);

        let elapsed = now.saturating_duration_since(self.started_at).as_secs();
        if elapsed > 0 {
            self.average.store(sent / elapsed, Ordering::Relaxed);
        }
    }

    /// Read-only view of all four values.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent: self.sent(),
            failed: self.failed(),
            current_throughput: self.current_throughput(),
            average_throughput: self.average_throughput(),
        }
    }
}

/// Point-in-time copy of a [`ThroughputCounter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub current_throughput: u64,
    pub average_throughput: u64,
}

impl CounterSnapshot {
    /// Look up a value by its attribute name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<u64> {
        match name {
            COUNTER_MESSAGE_SENT => Some(self.sent),
            COUNTER_MESSAGE_SENT_ERROR => Some(self.failed),
            CURRENT_THROUGHPUT => Some(self.current_throughput),
            AVERAGE_THROUGHPUT => Some(self.average_throughput),
            _ => None,
        }
    }
}

impl fmt::Display for CounterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{COUNTER_MESSAGE_SENT}={} {COUNTER_MESSAGE_SENT_ERROR}={} \
             {CURRENT_THROUGHPUT}={} {AVERAGE_THROUGHPUT}={}",
            self.sent, self.failed, self.current_throughput, self.average_throughput
        )
    }
}

/// Sample `counter` every `interval` until `cancel` fires.
pub async fn run_sampler(
    counter: Arc<ThroughputCounter>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => counter.sample(),
        }
    }
    tracing::debug!(name = %counter.name(), "Throughput sampler stopped");
}
