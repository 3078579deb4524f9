//! File identity resolution.
//!
//! An identity distinguishes "same file, renamed" from "different file, same
//! path". On Unix it is the device and inode pair, which survives renames.
//! Elsewhere the absolute path is used as a degraded identity.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Platform-derived token identifying a physical file independent of its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileIdentity {
    /// Device ID and inode number.
    Inode { dev: u64, ino: u64 },
    /// Absolute path, used where no stable file identifier exists.
    Path(PathBuf),
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inode { dev, ino } => write!(f, "{dev}:{ino}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Resolves a path to the identity of the file it currently denotes.
///
/// Implementations never fail loudly: a path that no longer exists resolves
/// to `None`.
pub trait IdentityResolver: Send + Sync + fmt::Debug {
    /// Resolve the identity of the file at `path`.
    fn resolve(&self, path: &Path) -> Option<FileIdentity>;

    /// Short name of the strategy, for logging.
    fn name(&self) -> &'static str;
}

/// Resolver based on device and inode numbers.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct InodeResolver;

#[cfg(unix)]
impl IdentityResolver for InodeResolver {
    fn resolve(&self, path: &Path) -> Option<FileIdentity> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path).ok()?;
        Some(FileIdentity::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    fn name(&self) -> &'static str {
        "inode"
    }
}

/// Resolver that uses the absolute path as the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathResolver;

impl IdentityResolver for PathResolver {
    fn resolve(&self, path: &Path) -> Option<FileIdentity> {
        if std::fs::metadata(path).is_err() {
            return None;
        }
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Some(FileIdentity::Path(absolute))
    }

    fn name(&self) -> &'static str {
        "path"
    }
}

/// Select the identity strategy for the current platform.
#[must_use]
pub fn platform_resolver() -> Arc<dyn IdentityResolver> {
    #[cfg(unix)]
    {
        Arc::new(InodeResolver)
    }
    #[cfg(not(unix))]
    {
        Arc::new(PathResolver)
    }
}
