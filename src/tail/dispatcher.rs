//! Per-root change-event dispatcher.
//!
//! One dispatcher owns one [`WatchedRoot`] and drains its notification
//! batches strictly in arrival order, routing each change to the create,
//! modify, delete or rename handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify_debouncer_full::notify::event::{ModifyKind, RenameMode};
use notify_debouncer_full::notify::EventKind;
use notify_debouncer_full::DebounceEventResult;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::extract::LineExtractor;
use super::registrar::{register_tree, RegistrationSummary, WatchedRoot};
use super::state::StartPolicy;
use super::store::{SharedTrackedFile, TrackedFileStore};

/// A filesystem change, reduced to what the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Create(PathBuf),
    Modify(PathBuf),
    Delete(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

/// Reduce a notification to the changes it implies.
#[must_use]
pub fn classify(kind: &EventKind, paths: &[PathBuf]) -> Vec<Change> {
    match kind {
        EventKind::Create(_) => paths.iter().cloned().map(Change::Create).collect(),
        EventKind::Remove(_) => paths.iter().cloned().map(Change::Delete).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths {
            [from, to] => vec![Change::Rename {
                from: from.clone(),
                to: to.clone(),
            }],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.iter().cloned().map(Change::Delete).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.iter().cloned().map(Change::Create).collect()
        }
        // Backends that cannot tell which side of a rename this is.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                if p.exists() {
                    Change::Create(p.clone())
                } else {
                    Change::Delete(p.clone())
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => Vec::new(),
        EventKind::Modify(_) => paths.iter().cloned().map(Change::Modify).collect(),
        EventKind::Any | EventKind::Other => paths
            .iter()
            .filter(|p| p.is_file())
            .cloned()
            .map(Change::Modify)
            .collect(),
    }
}

fn is_dir_nofollow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
}

async fn drain_entry(extractor: &LineExtractor, entry: &SharedTrackedFile) {
    let mut file = entry.lock().await;
    if let Err(e) = extractor.drain(&mut file).await {
        if e.is_not_found() {
            tracing::debug!(path = %file.path().display(), "File vanished before it could be read");
        } else {
            tracing::warn!(
                path = %file.path().display(),
                error = %e,
                "Failed to read tracked file"
            );
        }
    }
}

/// Emit what an open handle can still reach, then retire the entry.
async fn release(extractor: &LineExtractor, entry: &SharedTrackedFile) {
    let mut file = entry.lock().await;
    if file.is_open() {
        if let Err(e) = extractor.drain(&mut file).await {
            tracing::debug!(path = %file.path().display(), error = %e, "Final drain failed");
        }
    }
    file.retire();
}

async fn drain_under(store: &TrackedFileStore, extractor: &LineExtractor, dir: &Path) {
    for entry in store.entries() {
        let under = entry.lock().await.path().starts_with(dir);
        if under {
            drain_entry(extractor, &entry).await;
        }
    }
}

/// Routes the notifications of one watched root.
#[derive(Debug)]
pub struct Dispatcher {
    watched: WatchedRoot,
    store: Arc<TrackedFileStore>,
    extractor: LineExtractor,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        watched: WatchedRoot,
        store: Arc<TrackedFileStore>,
        extractor: LineExtractor,
    ) -> Self {
        Self {
            watched,
            store,
            extractor,
        }
    }

    #[must_use]
    pub fn watched(&self) -> &WatchedRoot {
        &self.watched
    }

    /// Register the whole root with `policy`.
    pub async fn register(&mut self, policy: StartPolicy) -> RegistrationSummary {
        let root = self.watched.root().to_path_buf();
        register_tree(&mut self.watched, &self.store, &root, policy).await
    }

    /// Apply one change.
    pub async fn apply(&mut self, change: Change) {
        tracing::debug!(root = %self.watched.config().id, ?change, "Dispatching change");
        match change {
            Change::Create(path) => self.handle_create(&path).await,
            Change::Modify(path) => self.handle_modify(&path).await,
            Change::Delete(path) => self.handle_delete(&path).await,
            Change::Rename { from, to } => self.handle_rename(&from, &to).await,
        }
    }

    /// A new directory is registered; a new file is tracked from offset 0 and
    /// drained at once, since it may have been renamed into place with content.
    pub async fn handle_create(&mut self, path: &Path) {
        if is_dir_nofollow(path) {
            // Everything inside a directory created after startup is new, and
            // may have been written before the subscription took effect.
            register_tree(&mut self.watched, &self.store, path, StartPolicy::Begin).await;
            drain_under(&self.store, &self.extractor, path).await;
            return;
        }
        if !self.watched.config().accepts(path) {
            return;
        }
        if let Some(entry) = self.store.get_or_create(path, StartPolicy::Begin).await {
            drain_entry(&self.extractor, &entry).await;
        }
    }

    /// Drain appended lines. A file whose state was lost is reattached from
    /// the start of its last line.
    pub async fn handle_modify(&mut self, path: &Path) {
        if is_dir_nofollow(path) || !self.watched.config().accepts(path) {
            return;
        }
        if let Some(entry) = self
            .store
            .get_or_create(path, StartPolicy::ResumeFromTail)
            .await
        {
            drain_entry(&self.extractor, &entry).await;
        }
    }

    /// Release the handle of a deleted file and drop its path from the index.
    pub async fn handle_delete(&mut self, path: &Path) {
        if self.watched.retire(path) {
            for orphan in self.store.forget_under(path) {
                release(&self.extractor, &orphan).await;
            }
            return;
        }

        let identity = self
            .store
            .resolve(path)
            .or_else(|| self.store.identity_for_path(path));
        if let Some(orphan) = self.store.forget_path(path) {
            release(&self.extractor, &orphan).await;
            tracing::debug!(path = %path.display(), "Stopped tracking deleted file");
        } else if let Some(entry) = identity.and_then(|id| self.store.get(&id)) {
            entry.lock().await.close();
        }
    }

    /// Follow a rename inside the watched tree without losing the cursor.
    pub async fn handle_rename(&mut self, from: &Path, to: &Path) {
        if self.watched.is_subscribed(from) {
            self.watched.retire(from);
            register_tree(&mut self.watched, &self.store, to, StartPolicy::Begin).await;
            for orphan in self.store.forget_under(from) {
                release(&self.extractor, &orphan).await;
            }
            return;
        }

        let Some(entry) = self.store.rename(from, to).await else {
            self.handle_create(to).await;
            return;
        };

        if !self.watched.config().accepts(to) {
            if let Some(orphan) = self.store.forget_path(to) {
                release(&self.extractor, &orphan).await;
            }
            return;
        }
        drain_entry(&self.extractor, &entry).await;
    }

    /// Re-register the root after the notification queue overflowed, then
    /// drain every tracked file so appends whose events were lost are read.
    pub async fn rescan(&mut self) {
        tracing::warn!(
            root = %self.watched.config().id,
            "Notification queue overflowed, rescanning"
        );
        self.register(StartPolicy::ResumeFromTail).await;
        let root = self.watched.root().to_path_buf();
        drain_under(&self.store, &self.extractor, &root).await;
    }

    /// Consume notification batches until cancelled or until every
    /// subscription of the root has been invalidated.
    ///
    /// Cancellation also interrupts a batch in progress, so a sink that never
    /// accepts cannot hold the dispatcher open.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<DebounceEventResult>,
        cancel: CancellationToken,
    ) {
        let root_id = self.watched.config().id.clone();
        tracing::info!(root = %root_id, "Dispatcher started");

        loop {
            let batch = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                batch = events.recv() => batch,
            };
            let Some(batch) = batch else {
                tracing::warn!(root = %root_id, "Notification channel closed");
                break;
            };

            let interrupted = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = self.handle_batch(batch) => false,
            };
            if interrupted {
                tracing::debug!(root = %root_id, "Cancelled while handling notifications");
                break;
            }

            if !self.watched.is_active() {
                tracing::warn!(root = %root_id, "No directories left to watch, retiring root");
                break;
            }
        }

        self.watched.unsubscribe_all();
        tracing::info!(root = %root_id, "Dispatcher stopped");
    }

    async fn handle_batch(&mut self, batch: DebounceEventResult) {
        match batch {
            Ok(events) => {
                for event in events {
                    if event.need_rescan() {
                        self.rescan().await;
                        continue;
                    }
                    for change in classify(&event.kind, &event.paths) {
                        self.apply(change).await;
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!(
                        root = %self.watched.config().id,
                        error = %error,
                        "Notification error"
                    );
                    for path in &error.paths {
                        if !path.exists() {
                            self.watched.retire(path);
                        }
                    }
                }
            }
        }
    }
}
