//! Version-control backends
//!
//! The repository views only need two things from version control: the
//! committed tree of a revision and whether a path is ignored. Both backends
//! here are filesystem-local; a real git backend implements the same traits.

pub mod snapshot;
pub mod workspace;

pub use snapshot::{SnapshotScm, SnapshotTree};
pub use workspace::{WorkspaceScm, WorkspaceTree};

use crate::error::ScmError;
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Revision name resolving to the live working directory
pub const WORKSPACE_REVISION: &str = "workspace";

/// Kind and size of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStat {
    pub kind: EntryKind,
    /// Blob size; `None` for directories
    pub size: Option<u64>,
}

/// One child of a tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Committed tree of one revision. Paths are relative to the SCM root.
pub trait ScmTree: Send + Sync {
    fn revision(&self) -> &str;

    /// Kind and size of `path`, `None` when absent
    fn stat(&self, path: &PathKey) -> Result<Option<TreeStat>, ScmError>;

    /// Children of the directory `path`, sorted by name
    fn list_tree(&self, path: &PathKey) -> Result<Vec<TreeEntry>, ScmError>;

    /// Content of the blob at `path`
    fn open_blob(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, ScmError>;

    fn read_blob(&self, path: &PathKey) -> Result<Vec<u8>, ScmError> {
        let mut reader = self.open_blob(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Version-control system handle
pub trait Scm: Send + Sync {
    /// Root directory of the SCM checkout
    fn root(&self) -> &Path;

    /// Resolve a symbolic reference to a revision id.
    fn resolve_revision(&self, reference: &str) -> Result<String, ScmError>;

    /// Committed tree of a resolved revision
    fn get_tree(&self, revision: &str) -> Result<Arc<dyn ScmTree>, ScmError>;

    /// True when the SCM ignores `path` (relative to the SCM root).
    fn is_ignored(&self, path: &PathKey) -> bool;
}
