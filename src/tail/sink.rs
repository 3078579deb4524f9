//! Outbound records and the sink they are handed to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One emitted line with the metadata of the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Line content, without its terminator.
    pub body: Vec<u8>,
    /// Header key to value, e.g. file path and base name.
    pub headers: BTreeMap<String, String>,
}

impl Record {
    /// Create a new record.
    #[must_use]
    pub fn new(body: Vec<u8>, headers: BTreeMap<String, String>) -> Self {
        Self { body, headers }
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Errors a sink may return from a hand-off.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Downstream receiver is gone.
    #[error("Sink closed")]
    Closed,

    /// Downstream refused the record.
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// I/O error while writing the record.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream consumer of emitted records.
///
/// Records are handed off one at a time. A failed hand-off is counted and
/// logged by the caller; the line is not retried.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Accept one record.
    async fn accept(&self, record: Record) -> Result<(), SinkError>;
}

/// Sink that forwards records into a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn accept(&self, record: Record) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::Closed)
    }
}
