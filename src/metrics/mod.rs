//! Counters exposed to an external metrics registry.

mod counter;
mod registry;

pub use counter::{
    run_sampler, CounterSnapshot, ThroughputCounter, AVERAGE_THROUGHPUT, COUNTER_MESSAGE_SENT,
    COUNTER_MESSAGE_SENT_ERROR, CURRENT_THROUGHPUT,
};
pub use registry::{InMemoryRegistry, MetricsRegistry};
