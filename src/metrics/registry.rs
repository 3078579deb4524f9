//! Registry through which counter groups are exposed for inspection.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::counter::{CounterSnapshot, ThroughputCounter};

/// Named counter groups, registered at engine start and removed at stop.
pub trait MetricsRegistry: Send + Sync {
    /// Expose `counter` under `name`, replacing any previous group.
    fn register(&self, name: &str, counter: Arc<ThroughputCounter>);

    /// Stop exposing the group registered under `name`.
    fn deregister(&self, name: &str);
}

/// Process-local registry backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    groups: RwLock<HashMap<String, Arc<ThroughputCounter>>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current values of the group registered under `name`.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<CounterSnapshot> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|counter| counter.snapshot())
    }

    /// Names of all registered groups, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl MetricsRegistry for InMemoryRegistry {
    fn register(&self, name: &str, counter: Arc<ThroughputCounter>) {
        tracing::debug!(name, "Registering counter group");
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), counter);
    }

    fn deregister(&self, name: &str) {
        tracing::debug!(name, "Deregistering counter group");
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}
