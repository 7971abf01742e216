//! Working-directory view

use crate::error::FsError;
use crate::fs::{DirEntry, EntryInfo, FileStamp, FileSystemView, WorkingLayer};
use crate::ignore::IgnoreRules;
use crate::repo::MARKER_DIR;
use crate::tree::path::PathKey;
use crate::types::{EntryKind, Layer};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// View of a directory on disk, filtered by ignore rules
#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root: PathBuf,
    ignore: IgnoreRules,
}

impl WorkspaceFs {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreRules) -> Self {
        Self {
            root: root.into(),
            ignore,
        }
    }

    /// View with the root's `.caskignore` loaded
    pub fn open_root(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        let ignore = IgnoreRules::load(&root)?;
        Ok(Self::new(root, ignore))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &PathKey) -> PathBuf {
        path.to_path(&self.root)
    }
}

impl FileSystemView for WorkspaceFs {
    fn info(&self, path: &PathKey) -> Result<EntryInfo, FsError> {
        if self.ignore.is_ignored(path) {
            return Err(FsError::NotFound(path.clone()));
        }
        let full = self.full_path(path);
        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FsError::NotFound(path.clone()))
            }
            // A file in place of an ancestor directory
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(FsError::NotFound(path.clone()))
            }
            Err(e) => return Err(FsError::io(full, e)),
        };
        // Directories are never entered through a link.
        if meta.is_dir() && !path.is_root() && is_symlink(&full) {
            return Err(FsError::NotFound(path.clone()));
        }

        let (kind, size, stamp) = if meta.is_dir() {
            (EntryKind::Directory, None, None)
        } else {
            (EntryKind::File, Some(meta.len()), FileStamp::from_metadata(&meta))
        };
        Ok(EntryInfo {
            path: path.clone(),
            kind,
            size,
            hash: None,
            layer: Layer::Workspace,
            location: Some(full),
            stamp,
        })
    }

    fn list_dir(&self, path: &PathKey) -> Result<Vec<DirEntry>, FsError> {
        let info = self.info(path)?;
        if !info.is_dir() {
            return Err(FsError::NotADirectory(path.clone()));
        }

        let dir = self.full_path(path);
        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping vanished entry");
                    continue;
                }
                Err(e) => return Err(FsError::io(&dir, io::Error::from(e))),
            };
            if entry.path_is_symlink() && !entry.path().is_file() {
                debug!(path = %entry.path().display(), "Skipping link to a directory or missing target");
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 name");
                continue;
            };
            let child = path.child(name);
            if self.ignore.is_ignored(&child) {
                continue;
            }
            let kind = if entry.file_type().is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: name.to_string(),
                kind,
            });
        }
        Ok(entries)
    }

    fn open(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, FsError> {
        let info = self.info(path)?;
        if info.is_dir() {
            return Err(FsError::IsADirectory(path.clone()));
        }
        let full = self.full_path(path);
        match File::open(&full) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound(path.clone())),
            Err(e) => Err(FsError::io(full, e)),
        }
    }
}

impl WorkingLayer for WorkspaceFs {
    fn as_view(&self) -> &dyn FileSystemView {
        self
    }

    fn layer(&self) -> Layer {
        Layer::Workspace
    }

    fn is_repo_root(&self, path: &PathKey) -> bool {
        !path.is_root() && self.full_path(path).join(MARKER_DIR).is_dir()
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}
