//! In-memory SCM with committed snapshots
//!
//! Each revision is an immutable map of file contents. `capture` records the
//! working directory the way a commit would: `.git` and gitignored paths are
//! left out.

use crate::error::ScmError;
use crate::ignore;
use crate::scm::{Scm, ScmTree, TreeEntry, TreeStat};
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Immutable tree of one snapshot
#[derive(Debug)]
pub struct SnapshotTree {
    revision: String,
    files: BTreeMap<PathKey, Arc<Vec<u8>>>,
    dirs: BTreeSet<PathKey>,
}

impl SnapshotTree {
    pub fn new(revision: impl Into<String>, files: BTreeMap<PathKey, Vec<u8>>) -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(PathKey::root());
        for path in files.keys() {
            let mut parent = path.parent();
            while let Some(dir) = parent {
                parent = dir.parent();
                dirs.insert(dir);
            }
        }
        Self {
            revision: revision.into(),
            files: files.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            dirs,
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl ScmTree for SnapshotTree {
    fn revision(&self) -> &str {
        &self.revision
    }

    fn stat(&self, path: &PathKey) -> Result<Option<TreeStat>, ScmError> {
        if let Some(bytes) = self.files.get(path) {
            return Ok(Some(TreeStat {
                kind: EntryKind::File,
                size: Some(bytes.len() as u64),
            }));
        }
        if self.dirs.contains(path) {
            return Ok(Some(TreeStat {
                kind: EntryKind::Directory,
                size: None,
            }));
        }
        Ok(None)
    }

    fn list_tree(&self, path: &PathKey) -> Result<Vec<TreeEntry>, ScmError> {
        if self.files.contains_key(path) {
            return Err(ScmError::NotADirectory(path.clone()));
        }
        if !self.dirs.contains(path) {
            return Err(ScmError::NotFound(path.clone()));
        }

        let depth = path.depth() + 1;
        let mut entries: Vec<TreeEntry> = self
            .dirs
            .range(path.clone()..)
            .take_while(|k| k.starts_with(path))
            .filter(|k| k.depth() == depth)
            .filter_map(|k| k.name())
            .map(|name| TreeEntry {
                name: name.to_string(),
                kind: EntryKind::Directory,
            })
            .collect();
        entries.extend(
            self.files
                .range(path.clone()..)
                .take_while(|(k, _)| k.starts_with(path))
                .filter(|(k, _)| k.depth() == depth)
                .filter_map(|(k, _)| k.name())
                .map(|name| TreeEntry {
                    name: name.to_string(),
                    kind: EntryKind::File,
                }),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_blob(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, ScmError> {
        match self.files.get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(Vec::clone(bytes)))),
            None if self.dirs.contains(path) => Err(ScmError::Backend(format!(
                "{} is a tree, not a blob",
                path
            ))),
            None => Err(ScmError::NotFound(path.clone())),
        }
    }
}

/// SCM holding an ordered list of in-memory snapshots
pub struct SnapshotScm {
    root: PathBuf,
    revisions: RwLock<Vec<Arc<SnapshotTree>>>,
}

impl SnapshotScm {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            revisions: RwLock::new(Vec::new()),
        }
    }

    /// Record a snapshot from explicit contents.
    pub fn commit(&self, revision: &str, files: BTreeMap<PathKey, Vec<u8>>) -> Arc<SnapshotTree> {
        let tree = Arc::new(SnapshotTree::new(revision, files));
        let mut revisions = self.revisions.write();
        revisions.retain(|existing| existing.revision != revision);
        revisions.push(tree.clone());
        info!(revision, files = tree.file_count(), "Committed snapshot");
        tree
    }

    /// Record the current working directory as `revision`.
    pub fn capture(&self, revision: &str) -> Result<Arc<SnapshotTree>, ScmError> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_name() == ".git" {
                    return false;
                }
                match key_for(&self.root, entry.path()) {
                    Some(key) => !ignore::is_git_ignored(&self.root, &key),
                    None => false,
                }
            });

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = key_for(&self.root, entry.path()) else {
                continue;
            };
            let bytes = fs::read(entry.path())?;
            debug!(path = %key, "Captured");
            files.insert(key, bytes);
        }
        Ok(self.commit(revision, files))
    }

    pub fn revisions(&self) -> Vec<String> {
        self.revisions
            .read()
            .iter()
            .map(|tree| tree.revision.clone())
            .collect()
    }
}

fn key_for(root: &Path, path: &Path) -> Option<PathKey> {
    PathKey::from_path(root, path).ok()
}

impl Scm for SnapshotScm {
    fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_revision(&self, reference: &str) -> Result<String, ScmError> {
        let revisions = self.revisions.read();
        if reference == "HEAD" {
            return revisions
                .last()
                .map(|tree| tree.revision.clone())
                .ok_or_else(|| ScmError::RevisionNotFound(reference.to_string()));
        }
        revisions
            .iter()
            .find(|tree| tree.revision == reference)
            .map(|tree| tree.revision.clone())
            .ok_or_else(|| ScmError::RevisionNotFound(reference.to_string()))
    }

    fn get_tree(&self, revision: &str) -> Result<Arc<dyn ScmTree>, ScmError> {
        let revisions = self.revisions.read();
        let tree = revisions
            .iter()
            .find(|tree| tree.revision == revision)
            .cloned()
            .ok_or_else(|| ScmError::RevisionNotFound(revision.to_string()))?;
        Ok(tree)
    }

    fn is_ignored(&self, path: &PathKey) -> bool {
        ignore::is_git_ignored(&self.root, path)
    }
}
