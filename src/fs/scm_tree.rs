//! View of a repository inside a committed SCM tree

use crate::error::{FsError, ScmError};
use crate::fs::{DirEntry, EntryInfo, FileSystemView, WorkingLayer};
use crate::ignore::{IgnoreRules, IGNORE_FILE};
use crate::repo::MARKER_DIR;
use crate::scm::ScmTree;
use crate::tree::path::PathKey;
use crate::types::{EntryKind, Layer};
use std::io::Read;
use std::sync::Arc;

/// Working layer pinned to a revision. `prefix` locates the repository root
/// inside the SCM tree.
pub struct ScmTreeFs {
    tree: Arc<dyn ScmTree>,
    prefix: PathKey,
    ignore: IgnoreRules,
}

impl ScmTreeFs {
    /// Build the view, reading `.caskignore` from the tree.
    pub fn new(tree: Arc<dyn ScmTree>, prefix: PathKey) -> Result<Self, FsError> {
        let ignore_path = prefix.child(IGNORE_FILE);
        let ignore = match tree.read_blob(&ignore_path) {
            Ok(bytes) => IgnoreRules::with_builtin(&String::from_utf8_lossy(&bytes)),
            Err(ScmError::NotFound(_)) => IgnoreRules::builtin(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            tree,
            prefix,
            ignore,
        })
    }

    pub fn revision(&self) -> &str {
        self.tree.revision()
    }

    pub fn tree(&self) -> &Arc<dyn ScmTree> {
        &self.tree
    }

    fn scm_path(&self, path: &PathKey) -> PathKey {
        self.prefix.concat(path)
    }

    fn translate(&self, path: &PathKey, err: ScmError) -> FsError {
        match err {
            ScmError::NotFound(_) => FsError::NotFound(path.clone()),
            ScmError::NotADirectory(_) => FsError::NotADirectory(path.clone()),
            other => FsError::Scm(other),
        }
    }
}

impl FileSystemView for ScmTreeFs {
    fn info(&self, path: &PathKey) -> Result<EntryInfo, FsError> {
        if self.ignore.is_ignored(path) {
            return Err(FsError::NotFound(path.clone()));
        }
        let stat = self
            .tree
            .stat(&self.scm_path(path))
            .map_err(|e| self.translate(path, e))?
            .ok_or_else(|| FsError::NotFound(path.clone()))?;
        Ok(EntryInfo {
            path: path.clone(),
            kind: stat.kind,
            size: stat.size,
            hash: None,
            layer: Layer::Revision,
            location: None,
            stamp: None,
        })
    }

    fn list_dir(&self, path: &PathKey) -> Result<Vec<DirEntry>, FsError> {
        if self.ignore.is_ignored(path) {
            return Err(FsError::NotFound(path.clone()));
        }
        let entries = self
            .tree
            .list_tree(&self.scm_path(path))
            .map_err(|e| self.translate(path, e))?;
        Ok(entries
            .into_iter()
            .filter(|entry| !self.ignore.is_ignored(&path.child(&entry.name)))
            .map(|entry| DirEntry {
                name: entry.name,
                kind: entry.kind,
            })
            .collect())
    }

    fn open(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, FsError> {
        let info = self.info(path)?;
        if info.kind == EntryKind::Directory {
            return Err(FsError::IsADirectory(path.clone()));
        }
        self.tree
            .open_blob(&self.scm_path(path))
            .map_err(|e| self.translate(path, e))
    }
}

impl WorkingLayer for ScmTreeFs {
    fn as_view(&self) -> &dyn FileSystemView {
        self
    }

    fn layer(&self) -> Layer {
        Layer::Revision
    }

    fn is_repo_root(&self, path: &PathKey) -> bool {
        if path.is_root() {
            return false;
        }
        matches!(
            self.tree.stat(&self.scm_path(path).child(MARKER_DIR)),
            Ok(Some(stat)) if stat.kind == EntryKind::Directory
        )
    }
}
