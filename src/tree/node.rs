//! Hash records and directory manifests

use crate::error::StorageError;
use crate::tree::hasher::{self, Algorithm};
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Suffix appended to directory digests when used as object ids
pub const DIR_SUFFIX: &str = ".dir";

/// Content identity of a file or directory.
///
/// Equality and hashing only consider `(algorithm, digest, kind)`; size,
/// file count and the attached manifest are informational.
#[derive(Debug, Clone)]
pub struct HashRecord {
    pub algorithm: Algorithm,
    pub digest: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub file_count: Option<u64>,
    pub manifest: Option<Arc<Manifest>>,
}

impl HashRecord {
    pub fn file(algorithm: Algorithm, digest: impl Into<String>) -> Self {
        HashRecord {
            algorithm,
            digest: digest.into(),
            kind: EntryKind::File,
            size: None,
            file_count: None,
            manifest: None,
        }
    }

    /// Directory record; size and file count are derived from the manifest.
    pub fn directory(algorithm: Algorithm, digest: impl Into<String>, manifest: Arc<Manifest>) -> Self {
        HashRecord {
            algorithm,
            digest: digest.into(),
            kind: EntryKind::Directory,
            size: manifest.total_size(),
            file_count: Some(manifest.len() as u64),
            manifest: Some(manifest),
        }
    }

    /// Directory record whose manifest has not been loaded yet
    pub fn directory_ref(algorithm: Algorithm, digest: impl Into<String>) -> Self {
        HashRecord {
            algorithm,
            digest: digest.into(),
            kind: EntryKind::Directory,
            size: None,
            file_count: None,
            manifest: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_file_count(mut self, file_count: u64) -> Self {
        self.file_count = Some(file_count);
        self
    }

    pub fn with_manifest(mut self, manifest: Arc<Manifest>) -> Self {
        if self.size.is_none() {
            self.size = manifest.total_size();
        }
        if self.file_count.is_none() {
            self.file_count = Some(manifest.len() as u64);
        }
        self.manifest = Some(manifest);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Object id: the digest, with [`DIR_SUFFIX`] for directories.
    pub fn value(&self) -> String {
        match self.kind {
            EntryKind::File => self.digest.clone(),
            EntryKind::Directory => format!("{}{}", self.digest, DIR_SUFFIX),
        }
    }

    /// Parse an object id as written in metafiles.
    pub fn from_value(algorithm: Algorithm, value: &str) -> Result<Self, StorageError> {
        let (digest, kind) = match value.strip_suffix(DIR_SUFFIX) {
            Some(digest) => (digest, EntryKind::Directory),
            None => (value, EntryKind::File),
        };
        if !hasher::is_valid_digest(algorithm, digest) {
            return Err(StorageError::InvalidObjectId(value.to_string()));
        }
        Ok(match kind {
            EntryKind::File => HashRecord::file(algorithm, digest),
            EntryKind::Directory => HashRecord::directory_ref(algorithm, digest),
        })
    }
}

impl PartialEq for HashRecord {
    fn eq(&self, other: &Self) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest && self.kind == other.kind
    }
}

impl Eq for HashRecord {}

impl Hash for HashRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.digest.hash(state);
        self.kind.hash(state);
    }
}

/// One leaf of a directory manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the directory the manifest describes
    pub path: PathKey,
    pub hash: HashRecord,
}

/// Flat, sorted list of every file beneath a directory.
///
/// Entries are ordered by their slash-joined path string, which is the order
/// the manifest digest is computed over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest, sorting entries and rejecting duplicates or
    /// non-file leaves.
    pub fn from_entries(mut entries: Vec<ManifestEntry>) -> Result<Self, StorageError> {
        entries.sort_by_cached_key(|e| e.path.as_posix());
        for pair in entries.windows(2) {
            if pair[0].path == pair[1].path {
                return Err(StorageError::Codec(format!(
                    "duplicate manifest entry: {}",
                    pair[0].path
                )));
            }
        }
        for entry in &entries {
            if entry.path.is_root() {
                return Err(StorageError::Codec("manifest entry with empty path".to_string()));
            }
            if entry.hash.is_dir() {
                return Err(StorageError::Codec(format!(
                    "manifest entry {} is not a file",
                    entry.path
                )));
            }
        }
        Ok(Manifest { entries })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of leaf sizes, when every leaf size is known
    pub fn total_size(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.hash.size).sum()
    }

    /// Leaf record at `path`
    pub fn get(&self, path: &PathKey) -> Option<&HashRecord> {
        let needle = path.as_posix();
        self.entries
            .binary_search_by(|e| e.path.as_posix().cmp(&needle))
            .ok()
            .map(|idx| &self.entries[idx].hash)
    }

    fn prefix_range(&self, prefix: &PathKey) -> &[ManifestEntry] {
        if prefix.is_root() {
            return &self.entries;
        }
        let needle = format!("{}/", prefix.as_posix());
        let start = self.entries.partition_point(|e| e.path.as_posix() < needle);
        let len = self.entries[start..]
            .iter()
            .take_while(|e| e.path.as_posix().starts_with(&needle))
            .count();
        &self.entries[start..start + len]
    }

    /// True when at least one leaf lies strictly beneath `path`.
    pub fn contains_dir(&self, path: &PathKey) -> bool {
        !self.prefix_range(path).is_empty()
    }

    /// Kind of `path` within the manifest, if it is present at all.
    pub fn kind_of(&self, path: &PathKey) -> Option<EntryKind> {
        if path.is_root() || self.contains_dir(path) {
            Some(EntryKind::Directory)
        } else if self.get(path).is_some() {
            Some(EntryKind::File)
        } else {
            None
        }
    }

    /// Manifest of the subdirectory `prefix`, re-rooted at that subdirectory.
    pub fn subtree(&self, prefix: &PathKey) -> Option<Manifest> {
        let range = self.prefix_range(prefix);
        if range.is_empty() {
            return None;
        }
        let entries = range
            .iter()
            .filter_map(|e| {
                e.path.relative_to(prefix).map(|path| ManifestEntry {
                    path,
                    hash: e.hash.clone(),
                })
            })
            .collect();
        Some(Manifest { entries })
    }

    /// Immediate children of `dir`, in manifest order, with the leaf record
    /// for files.
    pub fn children(&self, dir: &PathKey) -> Vec<(String, EntryKind, Option<HashRecord>)> {
        let depth = dir.depth();
        let mut children: Vec<(String, EntryKind, Option<HashRecord>)> = Vec::new();
        for entry in self.prefix_range(dir) {
            let Some(name) = entry.path.segments().get(depth) else {
                continue;
            };
            if children.iter().any(|(existing, _, _)| existing == name) {
                continue;
            }
            if entry.path.depth() == depth + 1 {
                children.push((name.clone(), EntryKind::File, Some(entry.hash.clone())));
            } else {
                children.push((name.clone(), EntryKind::Directory, None));
            }
        }
        children
    }
}
