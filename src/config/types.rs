//! Configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Header injection toggles applied to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Attach the absolute file path.
    pub file_header: bool,
    /// Header key for the file path.
    pub file_header_key: String,
    /// Attach the file's base name.
    pub basename_header: bool,
    /// Header key for the base name.
    pub basename_header_key: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            file_header: false,
            file_header_key: "file".to_string(),
            basename_header: false,
            basename_header_key: "basename".to_string(),
        }
    }
}

impl HeaderConfig {
    /// Build the metadata map for a file at `path`.
    #[must_use]
    pub fn headers_for(&self, path: &Path) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if self.file_header {
            headers.insert(
                self.file_header_key.clone(),
                path.to_string_lossy().into_owned(),
            );
        }
        if self.basename_header {
            if let Some(name) = path.file_name() {
                headers.insert(
                    self.basename_header_key.clone(),
                    name.to_string_lossy().into_owned(),
                );
            }
        }
        headers
    }
}

/// One logical directory entry, keyed by its identifier in `dirs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Root of the subtree to watch.
    pub path: PathBuf,
    /// Regex matched against file names; unmatched files are ignored.
    #[serde(default)]
    pub filename_pattern: Option<String>,
}

/// A resolved directory ready to be watched.
#[derive(Debug, Clone)]
pub struct WatchDirConfig {
    /// Logical identifier from `dirs`.
    pub id: String,
    /// Root of the subtree.
    pub path: PathBuf,
    /// Compiled filename filter.
    pub filename_pattern: Option<Regex>,
}

impl WatchDirConfig {
    /// Create an unfiltered entry for `path`.
    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            filename_pattern: None,
        }
    }

    /// Attach a filename filter.
    #[must_use]
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.filename_pattern = Some(pattern);
        self
    }

    /// Whether a file at `path` passes the filename filter.
    #[must_use]
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(pattern) = &self.filename_pattern else {
            return true;
        };
        path.file_name()
            .is_some_and(|name| pattern.is_match(&name.to_string_lossy()))
    }
}

/// Top-level tailing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Space-separated list of logical directory identifiers.
    pub dirs: String,
    /// Idle-close threshold in minutes.
    pub unlock_file_time: u64,
    /// Period of the idle-handle sweep, in seconds.
    pub reap_interval_secs: u64,
    /// Period of throughput sampling, in seconds.
    pub throughput_interval_secs: u64,
    /// Notification batching window, in milliseconds.
    pub debounce_ms: u64,
    /// Directory entries keyed by identifier.
    pub directories: BTreeMap<String, DirectoryConfig>,
    /// Header injection toggles.
    pub headers: HeaderConfig,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            dirs: String::new(),
            unlock_file_time: 1,
            reap_interval_secs: 10,
            throughput_interval_secs: 1,
            debounce_ms: 100,
            directories: BTreeMap::new(),
            headers: HeaderConfig::default(),
        }
    }
}

impl TailConfig {
    /// Idle-close threshold.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.unlock_file_time.saturating_mul(60))
    }

    /// Reaper period.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    /// Throughput sampling period.
    #[must_use]
    pub fn throughput_interval(&self) -> Duration {
        Duration::from_secs(self.throughput_interval_secs.max(1))
    }

    /// Notification batching window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Add a directory entry and list its identifier in `dirs`.
    pub fn add_directory(&mut self, id: &str, path: PathBuf, filename_pattern: Option<String>) {
        if !self.dirs.split_whitespace().any(|d| d == id) {
            if !self.dirs.trim().is_empty() {
                self.dirs.push(' ');
            }
            self.dirs.push_str(id);
        }
        self.directories.insert(
            id.to_string(),
            DirectoryConfig {
                path,
                filename_pattern,
            },
        );
    }

    /// Resolve the identifiers in `dirs` into watchable directories.
    ///
    /// Identifiers without a matching `directories` entry are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory resolves, or if a filename pattern is
    /// not a valid regex.
    pub fn resolve_roots(&self) -> Result<Vec<WatchDirConfig>, ConfigError> {
        let mut roots = Vec::new();

        for id in self.dirs.split_whitespace() {
            let Some(entry) = self.directories.get(id) else {
                tracing::warn!(id, "No directory configured for identifier, skipping");
                continue;
            };

            let filename_pattern = entry
                .filename_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| ConfigError::InvalidPattern {
                    id: id.to_string(),
                    source,
                })?;

            roots.push(WatchDirConfig {
                id: id.to_string(),
                path: entry.path.clone(),
                filename_pattern,
            });
        }

        if roots.is_empty() {
            return Err(ConfigError::NoDirectories);
        }
        Ok(roots)
    }
}
