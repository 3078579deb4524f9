//! Directory tailing engine.
//!
//! Watches directory trees for file changes and emits every newly completed
//! line of every regular file as a [`Record`], following files across renames,
//! truncation and idle handle closes.

mod dispatcher;
mod engine;
mod error;
mod extract;
mod identity;
mod reaper;
mod registrar;
mod sink;
mod state;
mod store;

pub use dispatcher::{classify, Change, Dispatcher};
pub use engine::{EngineOptions, TailEngine, DEFAULT_ENGINE_NAME};
pub use error::TailError;
pub use extract::{DrainStats, LineExtractor};
#[cfg(unix)]
pub use identity::InodeResolver;
pub use identity::{platform_resolver, FileIdentity, IdentityResolver, PathResolver};
pub use reaper::{run_reaper, sweep};
pub use registrar::{register_tree, DirectorySubscriber, RegistrationSummary, WatchedRoot};
pub use sink::{ChannelSink, Record, RecordSink, SinkError};
pub use state::{resume_from_tail, StartPolicy, TrackedFile};
pub use store::{SharedTrackedFile, TrackedFileStore};
