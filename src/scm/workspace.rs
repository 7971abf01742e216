//! SCM backend over the live working directory
//!
//! Its only revision is the working directory itself. Ignore checks read the
//! `.gitignore` files on disk.

use crate::error::ScmError;
use crate::ignore;
use crate::scm::{Scm, ScmTree, TreeEntry, TreeStat, WORKSPACE_REVISION};
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Tree view of a directory on disk
#[derive(Debug, Clone)]
pub struct WorkspaceTree {
    root: PathBuf,
}

impl WorkspaceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ScmTree for WorkspaceTree {
    fn revision(&self) -> &str {
        WORKSPACE_REVISION
    }

    fn stat(&self, path: &PathKey) -> Result<Option<TreeStat>, ScmError> {
        match fs::metadata(path.to_path(&self.root)) {
            Ok(meta) if meta.is_dir() => Ok(Some(TreeStat {
                kind: EntryKind::Directory,
                size: None,
            })),
            Ok(meta) => Ok(Some(TreeStat {
                kind: EntryKind::File,
                size: Some(meta.len()),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_tree(&self, path: &PathKey) -> Result<Vec<TreeEntry>, ScmError> {
        let dir = path.to_path(&self.root);
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ScmError::NotADirectory(path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ScmError::NotFound(path.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Broken symlinks have no kind; they are not part of the tree
                Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(io::Error::from(e).into()),
            };
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(TreeEntry {
                name: name.to_string(),
                kind,
            });
        }
        Ok(entries)
    }

    fn open_blob(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, ScmError> {
        let full = path.to_path(&self.root);
        match File::open(&full) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ScmError::NotFound(path.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

/// SCM over the working directory only
#[derive(Debug, Clone)]
pub struct WorkspaceScm {
    tree: Arc<WorkspaceTree>,
}

impl WorkspaceScm {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            tree: Arc::new(WorkspaceTree::new(root)),
        }
    }
}

impl Scm for WorkspaceScm {
    fn root(&self) -> &Path {
        self.tree.root()
    }

    fn resolve_revision(&self, reference: &str) -> Result<String, ScmError> {
        match reference {
            WORKSPACE_REVISION | "HEAD" => Ok(WORKSPACE_REVISION.to_string()),
            other => Err(ScmError::RevisionNotFound(other.to_string())),
        }
    }

    fn get_tree(&self, revision: &str) -> Result<Arc<dyn ScmTree>, ScmError> {
        if revision != WORKSPACE_REVISION {
            return Err(ScmError::RevisionNotFound(revision.to_string()));
        }
        Ok(self.tree.clone())
    }

    fn is_ignored(&self, path: &PathKey) -> bool {
        ignore::is_git_ignored(self.tree.root(), path)
    }
}
