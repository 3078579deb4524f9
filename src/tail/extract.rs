//! Incremental line extraction and emission.
//!
//! The cursor, not a line buffer, is the record of what has been seen: a
//! trailing partial line is never consumed and is re-scanned from the cursor
//! on the next drain, so a terminator split across two writes is counted once.
//! A bare `\r` ends a line only once the byte after it is known.

use std::io::SeekFrom;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};

use super::error::TailError;
use super::sink::{Record, RecordSink};
use super::state::TrackedFile;
use crate::metrics::ThroughputCounter;

/// Outcome of one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainStats {
    /// Records accepted by the sink.
    pub emitted: usize,
    /// Records the sink refused.
    pub failed: usize,
    /// Bytes the cursor advanced by.
    pub bytes: u64,
}

/// Reads complete lines from tracked files and hands them to the sink.
#[derive(Clone)]
pub struct LineExtractor {
    sink: Arc<dyn RecordSink>,
    counter: Arc<ThroughputCounter>,
}

impl std::fmt::Debug for LineExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineExtractor")
            .field("counter", &self.counter.name())
            .finish_non_exhaustive()
    }
}

impl LineExtractor {
    #[must_use]
    pub fn new(sink: Arc<dyn RecordSink>, counter: Arc<ThroughputCounter>) -> Self {
        Self { sink, counter }
    }

    #[must_use]
    pub fn counter(&self) -> &Arc<ThroughputCounter> {
        &self.counter
    }

    /// Read every complete line past the cursor and emit one record per line.
    ///
    /// The file is reopened first if it was idle-closed. Lines are handed off
    /// as they are read, so at most one line is held in memory. Empty lines
    /// advance the cursor without producing a record. A failed hand-off is
    /// counted and logged, and the remaining lines are still emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be reopened or read. The cursor is
    /// left at the last fully consumed line.
    pub async fn drain(&self, file: &mut TrackedFile) -> Result<DrainStats, TailError> {
        file.reopen().await?;

        let Some(mut handle) = file.take_handle() else {
            return Ok(DrainStats::default());
        };
        let result = self.stream_lines(file, &mut handle).await;
        file.restore_handle(handle);
        let stats = result?;

        if stats.bytes > 0 {
            tracing::trace!(
                path = %file.path().display(),
                cursor = file.cursor(),
                emitted = stats.emitted,
                failed = stats.failed,
                "Drained file"
            );
        }
        Ok(stats)
    }

    async fn stream_lines(
        &self,
        file: &mut TrackedFile,
        handle: &mut File,
    ) -> Result<DrainStats, TailError> {
        file.check_truncation(handle).await?;
        handle.seek(SeekFrom::Start(file.cursor())).await?;
        let mut reader = BufReader::new(handle);

        let mut stats = DrainStats::default();
        let mut line = Vec::new();
        while let Some(consumed) = next_line(&mut reader, &mut line).await? {
            file.advance(consumed);
            file.touch();
            stats.bytes += consumed;

            if line.is_empty() {
                tracing::trace!(path = %file.path().display(), "Skipping empty line");
                continue;
            }
            file.push_pending(std::mem::take(&mut line));
            while let Some(pending) = file.pop_pending() {
                self.emit(file, pending, &mut stats).await;
            }
        }
        Ok(stats)
    }

    async fn emit(&self, file: &TrackedFile, line: Vec<u8>, stats: &mut DrainStats) {
        let record = Record::new(line, file.metadata().clone());
        match self.sink.accept(record).await {
            Ok(()) => {
                self.counter.increment_sent();
                stats.emitted += 1;
            }
            Err(e) => {
                self.counter.increment_failed();
                stats.failed += 1;
                tracing::warn!(
                    path = %file.path().display(),
                    error = %e,
                    "Failed to hand off record, dropping line"
                );
            }
        }
    }
}

/// Read the next terminated line into `line`, without its terminator.
///
/// A line ends at `\n`, `\r\n` or a bare `\r`. Returns the bytes consumed
/// including the terminator, or `None` when only an unterminated tail is
/// left. A `\r` as the last available byte is treated as unterminated until
/// the next byte shows whether a `\n` follows it.
async fn next_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<Option<u64>>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let mut consumed = 0u64;
    let mut after_cr = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(None);
        }

        if after_cr {
            if available[0] == b'\n' {
                reader.consume(1);
                consumed += 1;
            }
            return Ok(Some(consumed));
        }

        let Some(i) = available.iter().position(|&b| b == b'\n' || b == b'\r') else {
            line.extend_from_slice(available);
            let n = available.len();
            reader.consume(n);
            consumed += n as u64;
            continue;
        };

        line.extend_from_slice(&available[..i]);
        let mut used = i + 1;
        if available[i] == b'\r' {
            match available.get(i + 1) {
                Some(b'\n') => used += 1,
                Some(_) => {}
                None => after_cr = true,
            }
        }
        reader.consume(used);
        consumed += used as u64;
        if !after_cr {
            return Ok(Some(consumed));
        }
    }
}
