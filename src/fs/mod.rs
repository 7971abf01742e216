//! Filesystem views over a repository
//!
//! Every view answers the same questions (`info`, `list_dir`, `open`) about
//! [`PathKey`]s relative to its root:
//!
//! - [`WorkspaceFs`]: the working directory on disk
//! - [`ScmTreeFs`]: the committed tree of a pinned revision
//! - [`TrackedFileSystem`]: recorded metadata resolved through the cache
//! - [`RepoFileSystem`]: the overlay of a working layer and tracked entries,
//!   with sub-repository delegation

pub mod repo;
pub mod scm_tree;
pub mod tracked;
pub mod walk;
pub mod workspace;

pub use repo::{RepoFileSystem, RepoFsOptions};
pub use scm_tree::ScmTreeFs;
pub use tracked::{TrackedFileSystem, TrackedOut};
pub use walk::{Walk, WalkEntry, WalkOptions};
pub use workspace::WorkspaceFs;

use crate::error::FsError;
use crate::tree::node::HashRecord;
use crate::tree::path::PathKey;
use crate::types::{EntryKind, Layer};
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Size and modification time identifying one version of a file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub size: u64,
    pub mtime_ns: u128,
}

impl FileStamp {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Option<Self> {
        let modified = meta.modified().ok()?;
        let mtime_ns = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Some(FileStamp {
            size: meta.len(),
            mtime_ns,
        })
    }

    pub fn mtime(&self) -> SystemTime {
        let nanos = u64::try_from(self.mtime_ns).unwrap_or(u64::MAX);
        UNIX_EPOCH + std::time::Duration::from_nanos(nanos)
    }
}

/// Metadata about one entry of a view
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub path: PathKey,
    pub kind: EntryKind,
    pub size: Option<u64>,
    /// Recorded hash, when the entry resolves from recorded metadata or the
    /// working copy is proven to match it
    pub hash: Option<HashRecord>,
    pub layer: Layer,
    /// On-disk location, for working-directory entries
    pub location: Option<PathBuf>,
    pub stamp: Option<FileStamp>,
}

impl EntryInfo {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}

/// One child in a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Read-only filesystem view
pub trait FileSystemView: Send + Sync {
    fn info(&self, path: &PathKey) -> Result<EntryInfo, FsError>;

    /// Children of a directory, sorted by name
    fn list_dir(&self, path: &PathKey) -> Result<Vec<DirEntry>, FsError>;

    fn open(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, FsError>;

    fn exists(&self, path: &PathKey) -> bool {
        self.info(path).is_ok()
    }

    fn is_dir(&self, path: &PathKey) -> bool {
        matches!(self.info(path), Ok(info) if info.is_dir())
    }

    fn is_file(&self, path: &PathKey) -> bool {
        matches!(self.info(path), Ok(info) if info.is_file())
    }
}

/// View that can serve as the top layer of a [`RepoFileSystem`]
pub trait WorkingLayer: FileSystemView {
    fn as_view(&self) -> &dyn FileSystemView;

    fn layer(&self) -> Layer;

    /// True when `path` holds a repository marker directory. Checked
    /// physically, regardless of ignore rules.
    fn is_repo_root(&self, path: &PathKey) -> bool;
}
