//! Per-file tailing state.

use std::collections::{BTreeMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::TailError;
use super::identity::FileIdentity;
use crate::config::HeaderConfig;

/// Size of the window read per step when scanning backward for a line start.
const TAIL_SCAN_CHUNK: usize = 4096;

/// Where a newly tracked file's cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    /// Offset 0. Used for files created while watching.
    Begin,
    /// End of file. Used by the initial scan so history is not replayed.
    End,
    /// Start of the last complete line. Used when reattaching to a file
    /// whose prior state was lost.
    ResumeFromTail,
}

/// One physical file under observation.
#[derive(Debug)]
pub struct TrackedFile {
    identity: FileIdentity,
    path: PathBuf,
    cursor: u64,
    pending_lines: VecDeque<Vec<u8>>,
    last_activity: Instant,
    handle: Option<File>,
    /// Set while the start policy has not been applied yet.
    unpositioned: Option<StartPolicy>,
    metadata: BTreeMap<String, String>,
}

impl TrackedFile {
    /// Open `path` and position the cursor according to `policy`.
    ///
    /// A file that cannot be opened or positioned (typically because it
    /// vanished or shrank after its identity was resolved) yields an entry in
    /// the closed state. The policy is applied on the next successful reopen.
    pub async fn open(
        identity: FileIdentity,
        path: PathBuf,
        policy: StartPolicy,
        headers: &HeaderConfig,
    ) -> Self {
        let mut tracked = Self {
            metadata: headers.headers_for(&path),
            identity,
            path,
            cursor: 0,
            pending_lines: VecDeque::new(),
            last_activity: Instant::now(),
            handle: None,
            unpositioned: Some(policy),
        };

        match File::open(&tracked.path).await {
            Ok(mut file) => match position(&mut file, policy).await {
                Ok(cursor) => {
                    tracked.cursor = cursor;
                    tracked.handle = Some(file);
                    tracked.unpositioned = None;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %tracked.path.display(),
                        error = %e,
                        "Failed to position new tracked file, leaving it closed"
                    );
                }
            },
            Err(e) => {
                tracing::debug!(
                    path = %tracked.path.display(),
                    error = %e,
                    "Tracked file not openable, leaving it closed"
                );
            }
        }

        tracing::debug!(
            path = %tracked.path.display(),
            identity = %tracked.identity,
            cursor = tracked.cursor,
            ?policy,
            "Tracking file"
        );
        tracked
    }

    /// Reopen the handle if it was closed.
    ///
    /// An entry that was never positioned gets its start policy applied now.
    /// Otherwise, if the file shrank below the cursor while closed, it was
    /// truncated or replaced, so the cursor is repositioned with
    /// [`StartPolicy::ResumeFromTail`].
    ///
    /// # Errors
    ///
    /// Returns [`TailError::FileVanished`] if the file no longer exists, or an
    /// I/O error if it cannot be opened or inspected.
    pub async fn reopen(&mut self) -> Result<(), TailError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TailError::FileVanished(self.path.clone()));
            }
            Err(e) => return Err(TailError::Io(e)),
        };

        if let Some(policy) = self.unpositioned {
            self.cursor = position(&mut file, policy).await?;
            self.unpositioned = None;
        } else {
            self.check_truncation(&mut file).await?;
        }
        tracing::debug!(path = %self.path.display(), cursor = self.cursor, "Reopened tracked file");
        self.handle = Some(file);
        Ok(())
    }

    /// Reposition the cursor if the file is now shorter than it.
    pub(crate) async fn check_truncation(&mut self, file: &mut File) -> Result<(), TailError> {
        let len = file.metadata().await?.len();
        if len < self.cursor {
            let cursor = resume_from_tail(file).await?;
            tracing::warn!(
                path = %self.path.display(),
                old_cursor = self.cursor,
                new_len = len,
                new_cursor = cursor,
                "File truncated, resuming from last line"
            );
            self.cursor = cursor;
        }
        Ok(())
    }

    /// Release the handle, keeping cursor and pending lines.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!(
                path = %self.path.display(),
                cursor = self.cursor,
                "Closed tracked file"
            );
        }
    }

    /// Release the handle and drop any lines not yet emitted.
    pub fn retire(&mut self) {
        self.pending_lines.clear();
        self.close();
    }

    /// Record a new path for the same physical file, keeping the cursor.
    pub fn set_path(&mut self, path: PathBuf, headers: &HeaderConfig) {
        tracing::debug!(
            from = %self.path.display(),
            to = %path.display(),
            identity = %self.identity,
            "Tracked file renamed"
        );
        self.metadata = headers.headers_for(&path);
        self.path = path;
    }

    #[must_use]
    pub fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next unread byte.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Headers attached to every record from this file.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Number of complete lines read but not yet emitted.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending_lines.len()
    }

    pub(crate) fn take_handle(&mut self) -> Option<File> {
        self.handle.take()
    }

    pub(crate) fn restore_handle(&mut self, file: File) {
        self.handle = Some(file);
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        self.cursor += bytes;
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn push_pending(&mut self, line: Vec<u8>) {
        self.pending_lines.push_back(line);
    }

    pub(crate) fn pop_pending(&mut self) -> Option<Vec<u8>> {
        self.pending_lines.pop_front()
    }
}

/// Compute the starting cursor for `file` under `policy`.
async fn position(file: &mut File, policy: StartPolicy) -> std::io::Result<u64> {
    match policy {
        StartPolicy::Begin => Ok(0),
        StartPolicy::End => Ok(file.metadata().await?.len()),
        StartPolicy::ResumeFromTail => resume_from_tail(file).await,
    }
}

/// Offset of the start of the last line in `file`.
///
/// The terminator ending the file (`\n`, `\r\n` or `\r`) is skipped, then
/// the file is scanned backward for the previous terminator. Returns the
/// offset just past it, or 0 if there is none.
///
/// # Errors
///
/// Returns an error if the file cannot be inspected, seeked or read.
pub async fn resume_from_tail(file: &mut File) -> std::io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let tail_width = len.min(2);
    let mut tail = [0u8; 2];
    let tail = &mut tail[..usize::try_from(tail_width).unwrap_or(2)];
    file.seek(SeekFrom::Start(len - tail_width)).await?;
    file.read_exact(tail).await?;

    // Exclusive bound of the region that may hold the previous terminator.
    let mut end = match tail {
        [.., b'\r', b'\n'] => len - 2,
        [.., b'\n' | b'\r'] => len - 1,
        _ => len,
    };

    let mut buf = vec![0u8; TAIL_SCAN_CHUNK];
    while end > 0 {
        let start = end.saturating_sub(TAIL_SCAN_CHUNK as u64);
        let width = usize::try_from(end - start).unwrap_or(TAIL_SCAN_CHUNK);
        let chunk = &mut buf[..width];

        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(chunk).await?;

        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n' || b == b'\r') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }

    Ok(0)
}
