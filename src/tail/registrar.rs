//! Directory discovery and subscription.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{Debouncer, RecommendedCache};
use walkdir::WalkDir;

use super::error::TailError;
use super::state::StartPolicy;
use super::store::TrackedFileStore;
use crate::config::WatchDirConfig;

/// Something that can deliver change notifications for a single directory.
pub trait DirectorySubscriber: Send {
    /// Start receiving create/modify/delete notifications for `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be watched.
    fn subscribe(&mut self, dir: &Path) -> Result<(), TailError>;

    /// Stop receiving notifications for `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory was not being watched.
    fn unsubscribe(&mut self, dir: &Path) -> Result<(), TailError>;
}

impl DirectorySubscriber for Debouncer<RecommendedWatcher, RecommendedCache> {
    fn subscribe(&mut self, dir: &Path) -> Result<(), TailError> {
        self.watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| TailError::Subscribe {
                path: dir.to_path_buf(),
                source,
            })
    }

    fn unsubscribe(&mut self, dir: &Path) -> Result<(), TailError> {
        self.unwatch(dir).map_err(TailError::from)
    }
}

/// A directory subtree under subscription.
///
/// Owns the subscriber and the set of directories currently subscribed:
/// the root itself plus every subdirectory discovered so far.
pub struct WatchedRoot {
    config: WatchDirConfig,
    subscriber: Box<dyn DirectorySubscriber>,
    subscriptions: HashSet<PathBuf>,
}

impl std::fmt::Debug for WatchedRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchedRoot")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl WatchedRoot {
    #[must_use]
    pub fn new(config: WatchDirConfig, subscriber: Box<dyn DirectorySubscriber>) -> Self {
        Self {
            config,
            subscriber,
            subscriptions: HashSet::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WatchDirConfig {
        &self.config
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.path
    }

    /// Subscribe `dir` unless it already is. Returns whether a new
    /// subscription was made.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscriber refuses the directory.
    pub fn subscribe(&mut self, dir: &Path) -> Result<bool, TailError> {
        if self.subscriptions.contains(dir) {
            return Ok(false);
        }
        self.subscriber.subscribe(dir)?;
        self.subscriptions.insert(dir.to_path_buf());
        tracing::info!(root = %self.config.id, dir = %dir.display(), "Subscribed directory");
        Ok(true)
    }

    /// Drop the subscription for a directory that no longer exists.
    ///
    /// Returns whether `dir` was subscribed.
    pub fn retire(&mut self, dir: &Path) -> bool {
        if !self.subscriptions.remove(dir) {
            return false;
        }
        // The OS usually invalidates the watch itself once the directory is gone.
        if let Err(e) = self.subscriber.unsubscribe(dir) {
            tracing::trace!(dir = %dir.display(), error = %e, "Unsubscribe after removal");
        }
        tracing::info!(
            root = %self.config.id,
            dir = %dir.display(),
            "Directory subscription retired"
        );
        true
    }

    #[must_use]
    pub fn is_subscribed(&self, dir: &Path) -> bool {
        self.subscriptions.contains(dir)
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether any subscription is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Tear down every subscription.
    pub fn unsubscribe_all(&mut self) {
        for dir in self.subscriptions.drain() {
            if let Err(e) = self.subscriber.unsubscribe(&dir) {
                tracing::trace!(dir = %dir.display(), error = %e, "Unsubscribe failed");
            }
        }
    }
}

/// What one registration pass found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationSummary {
    /// Directories newly subscribed.
    pub directories: usize,
    /// Regular files registered in the store.
    pub files: usize,
}

/// Subscribe every directory under `start` and register every regular file.
///
/// The walk itself is synchronous. Directories that cannot be read or
/// subscribed are logged and their branch skipped; siblings still register.
/// Files are added with `policy` and only if they pass the root's filename
/// filter. Registering an already known tree creates no duplicate entries.
pub async fn register_tree(
    watched: &mut WatchedRoot,
    store: &TrackedFileStore,
    start: &Path,
    policy: StartPolicy,
) -> RegistrationSummary {
    let mut summary = RegistrationSummary::default();
    let mut files = Vec::new();

    let mut walker = WalkDir::new(start).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %watched.config.id, error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            match watched.subscribe(entry.path()) {
                Ok(true) => summary.directories += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        dir = %entry.path().display(),
                        error = %e,
                        "Failed to subscribe directory, skipping branch"
                    );
                    walker.skip_current_dir();
                }
            }
        } else if file_type.is_file() && watched.config.accepts(entry.path()) {
            files.push(entry.into_path());
        }
    }
    drop(walker);

    for path in files {
        if store.get_or_create(&path, policy).await.is_some() {
            summary.files += 1;
        }
    }

    tracing::debug!(
        start = %start.display(),
        directories = summary.directories,
        files = summary.files,
        "Registered tree"
    );
    summary
}
