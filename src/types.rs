//! Core shared types for the cask repository filesystem.

use serde::{Deserialize, Serialize};

/// File or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }

    pub fn is_file(self) -> bool {
        matches!(self, EntryKind::File)
    }
}

/// Which layer of a composite view answered a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// The real working directory
    Workspace,
    /// The committed tree of a pinned revision
    Revision,
    /// Recorded metadata resolved through the object store
    Tracked,
}

/// Classification of a path against its recorded entry.
///
/// Recomputed per query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirtyState {
    /// Working copy absent (and cached) or matching the recorded hash
    Clean,
    /// Working copy present and different from the recorded hash
    Modified,
    /// Present in the working copy without a recorded entry
    Untracked,
    /// Recorded, but absent from both the working copy and the cache
    Missing,
}
