//! Registry of tracked files keyed by identity.
//!
//! The store owns every [`TrackedFile`]. Its key space (the identity map and
//! the path index) sits behind a single mutex that is never held across an
//! await point. Each entry carries its own async lock, so the dispatcher and
//! the reaper serialize on a per-file basis.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::Mutex;

use super::identity::{FileIdentity, IdentityResolver};
use super::state::{StartPolicy, TrackedFile};
use crate::config::HeaderConfig;

/// Shared handle to one tracked file.
pub type SharedTrackedFile = Arc<Mutex<TrackedFile>>;

#[derive(Debug, Default)]
struct StoreInner {
    files: HashMap<FileIdentity, SharedTrackedFile>,
    /// Last-known path to identity, used when a deleted path can no longer be resolved.
    paths: HashMap<PathBuf, FileIdentity>,
}

/// Identity-keyed registry of tracked files.
#[derive(Debug)]
pub struct TrackedFileStore {
    inner: std::sync::Mutex<StoreInner>,
    resolver: Arc<dyn IdentityResolver>,
    headers: HeaderConfig,
}

impl TrackedFileStore {
    /// Create an empty store using `resolver` for every identity lookup.
    #[must_use]
    pub fn new(resolver: Arc<dyn IdentityResolver>, headers: HeaderConfig) -> Self {
        Self {
            inner: std::sync::Mutex::new(StoreInner::default()),
            resolver,
            headers,
        }
    }

    fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the current identity of `path`.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> Option<FileIdentity> {
        self.resolver.resolve(path)
    }

    /// Return the entry for the file at `path`, creating it if its identity is new.
    ///
    /// An existing entry whose recorded path differs is updated in place and
    /// keeps its cursor. A new entry starts at the offset `policy` selects.
    /// Returns `None` if `path` cannot be resolved (the file is already gone).
    pub async fn get_or_create(
        &self,
        path: &Path,
        policy: StartPolicy,
    ) -> Option<SharedTrackedFile> {
        let Some(identity) = self.resolver.resolve(path) else {
            tracing::trace!(path = %path.display(), "Path no longer resolves, not tracking");
            return None;
        };

        let existing = {
            let mut inner = self.inner();
            inner.paths.insert(path.to_path_buf(), identity.clone());
            inner.files.get(&identity).cloned()
        };

        if let Some(entry) = existing {
            {
                let mut file = entry.lock().await;
                if file.path() != path {
                    self.prune_stale_aliases(&identity, path);
                    file.set_path(path.to_path_buf(), &self.headers);
                }
            }
            return Some(entry);
        }

        let created =
            TrackedFile::open(identity.clone(), path.to_path_buf(), policy, &self.headers).await;

        let mut inner = self.inner();
        inner.paths.insert(path.to_path_buf(), identity.clone());
        let entry = inner
            .files
            .entry(identity)
            .or_insert_with(|| Arc::new(Mutex::new(created)))
            .clone();
        Some(entry)
    }

    /// Drop index entries for `identity` other than `current` whose path no
    /// longer resolves to it.
    fn prune_stale_aliases(&self, identity: &FileIdentity, current: &Path) {
        let aliases: Vec<PathBuf> = self
            .inner()
            .paths
            .iter()
            .filter(|(p, id)| *id == identity && p.as_path() != current)
            .map(|(p, _)| p.clone())
            .collect();

        let stale: Vec<PathBuf> = aliases
            .into_iter()
            .filter(|p| self.resolver.resolve(p).as_ref() != Some(identity))
            .collect();
        if stale.is_empty() {
            return;
        }

        let mut inner = self.inner();
        for path in stale {
            if inner.paths.get(&path) == Some(identity) {
                tracing::trace!(path = %path.display(), "Dropping stale path alias");
                inner.paths.remove(&path);
            }
        }
    }

    /// Look up an entry by identity.
    #[must_use]
    pub fn get(&self, identity: &FileIdentity) -> Option<SharedTrackedFile> {
        self.inner().files.get(identity).cloned()
    }

    /// Identity last recorded for `path`.
    #[must_use]
    pub fn identity_for_path(&self, path: &Path) -> Option<FileIdentity> {
        self.inner().paths.get(path).cloned()
    }

    /// Move the index entry for `from` to `to` and update the tracked path.
    ///
    /// Returns the entry, or `None` if `from` was not tracked.
    pub async fn rename(&self, from: &Path, to: &Path) -> Option<SharedTrackedFile> {
        let entry = {
            let mut inner = self.inner();
            let identity = inner.paths.remove(from)?;
            inner.paths.insert(to.to_path_buf(), identity.clone());
            inner.files.get(&identity).cloned()
        }?;

        entry.lock().await.set_path(to.to_path_buf(), &self.headers);
        Some(entry)
    }

    /// Remove `path` from the index.
    ///
    /// If no other path maps to the same identity, the entry is removed from
    /// the store and returned so the caller can release it.
    pub fn forget_path(&self, path: &Path) -> Option<SharedTrackedFile> {
        let mut inner = self.inner();
        let identity = inner.paths.remove(path)?;

        if inner.paths.values().any(|id| *id == identity) {
            return None;
        }
        inner.files.remove(&identity)
    }

    /// Remove every indexed path below `dir`.
    ///
    /// Returns the entries left with no path, already removed from the store.
    pub fn forget_under(&self, dir: &Path) -> Vec<SharedTrackedFile> {
        let mut inner = self.inner();
        let stale: Vec<PathBuf> = inner
            .paths
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();

        let mut orphans = Vec::new();
        for path in stale {
            let Some(identity) = inner.paths.remove(&path) else {
                continue;
            };
            if inner.paths.values().any(|id| *id == identity) {
                continue;
            }
            if let Some(entry) = inner.files.remove(&identity) {
                orphans.push(entry);
            }
        }
        orphans
    }

    /// Snapshot of every entry, for sweeps.
    #[must_use]
    pub fn entries(&self) -> Vec<SharedTrackedFile> {
        self.inner().files.values().cloned().collect()
    }

    /// Whether `path` is in the index.
    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.inner().paths.contains_key(path)
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner().files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner().files.is_empty()
    }

    /// Release every open handle, dropping unemitted lines.
    ///
    /// Returns the number of handles that were open.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for entry in self.entries() {
            let mut file = entry.lock().await;
            if file.is_open() {
                closed += 1;
            }
            file.retire();
        }
        closed
    }
}
