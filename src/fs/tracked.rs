//! Cache-only view of recorded entries
//!
//! The index of tracked outputs is built lazily from the metafiles in an SCM
//! tree. Content is served from the object store; directory manifests are
//! loaded on first use and memoized per output.

use crate::concurrency::SingleFlight;
use crate::error::{FsError, ScmError};
use crate::fs::{DirEntry, EntryInfo, FileSystemView};
use crate::repo::MARKER_DIR;
use crate::scm::ScmTree;
use crate::store::codec::{self, METAFILE_SUFFIX};
use crate::store::ObjectStore;
use crate::tree::hasher;
use crate::tree::node::{HashRecord, Manifest};
use crate::tree::path::PathKey;
use crate::types::{EntryKind, Layer};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Read;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// An output declared by a metafile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOut {
    /// Output path relative to the repository root
    pub path: PathKey,
    /// Metafile declaring it
    pub metafile: PathKey,
    /// Recorded hash; `None` when declared without content
    pub record: Option<HashRecord>,
}

#[derive(Debug, Default)]
struct TrackedIndex {
    outs: BTreeMap<PathKey, TrackedOut>,
}

impl TrackedIndex {
    fn owner(&self, path: &PathKey) -> Option<&TrackedOut> {
        if let Some(out) = self.outs.get(path) {
            return Some(out);
        }
        let mut candidate = path.parent();
        while let Some(prefix) = candidate {
            if prefix.is_root() {
                break;
            }
            if let Some(out) = self.outs.get(&prefix) {
                return Some(out);
            }
            candidate = prefix.parent();
        }
        None
    }

    /// Recorded outputs strictly beneath `path`
    fn descendants<'a>(&'a self, path: &'a PathKey) -> impl Iterator<Item = &'a TrackedOut> + 'a {
        self.outs
            .range((Bound::Excluded(path.clone()), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(path))
            .map(|(_, out)| out)
            .filter(|out| out.record.is_some())
    }
}

enum Resolved {
    Out(TrackedOut),
    Inside { out: TrackedOut, rel: PathKey },
    Ancestor,
    Absent,
}

/// View of what metafiles record, served from the cache
pub struct TrackedFileSystem {
    tree: Arc<dyn ScmTree>,
    prefix: PathKey,
    store: Arc<dyn ObjectStore>,
    index: RwLock<Option<Arc<TrackedIndex>>>,
    manifests: SingleFlight<PathKey, Arc<Manifest>>,
}

impl TrackedFileSystem {
    /// `prefix` locates the repository root inside `tree`.
    pub fn new(tree: Arc<dyn ScmTree>, prefix: PathKey, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            tree,
            prefix,
            store,
            index: RwLock::new(None),
            manifests: SingleFlight::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Drop the index and memoized manifests.
    pub fn reset(&self) {
        *self.index.write() = None;
        self.manifests.clear();
    }

    fn index(&self) -> Result<Arc<TrackedIndex>, FsError> {
        if let Some(index) = self.index.read().as_ref() {
            return Ok(index.clone());
        }
        let mut slot = self.index.write();
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }
        let index = Arc::new(self.build_index()?);
        *slot = Some(index.clone());
        Ok(index)
    }

    #[instrument(skip(self), fields(revision = %self.tree.revision(), prefix = %self.prefix))]
    fn build_index(&self) -> Result<TrackedIndex, FsError> {
        let start = Instant::now();
        let mut index = TrackedIndex::default();
        let mut pending = vec![PathKey::root()];

        while let Some(dir) = pending.pop() {
            let entries = match self.tree.list_tree(&self.prefix.concat(&dir)) {
                Ok(entries) => entries,
                Err(ScmError::NotFound(_)) if dir.is_root() => break,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let child = dir.child(&entry.name);
                match entry.kind {
                    EntryKind::Directory => {
                        if entry.name == ".git" || entry.name == MARKER_DIR {
                            continue;
                        }
                        if self.is_subrepo_root(&child) {
                            debug!(path = %child, "Skipping sub-repository metadata");
                            continue;
                        }
                        pending.push(child);
                    }
                    EntryKind::File => {
                        if entry.name.len() > METAFILE_SUFFIX.len() && entry.name.ends_with(METAFILE_SUFFIX) {
                            self.load_metafile(&dir, &child, &mut index)?;
                        }
                    }
                }
            }
        }

        info!(
            outs = index.outs.len(),
            duration_ms = start.elapsed().as_millis(),
            "Tracked index built"
        );
        Ok(index)
    }

    fn is_subrepo_root(&self, dir: &PathKey) -> bool {
        matches!(
            self.tree.stat(&self.prefix.concat(dir).child(MARKER_DIR)),
            Ok(Some(stat)) if stat.kind == EntryKind::Directory
        )
    }

    fn load_metafile(
        &self,
        dir: &PathKey,
        metafile: &PathKey,
        index: &mut TrackedIndex,
    ) -> Result<(), FsError> {
        let bytes = self.tree.read_blob(&self.prefix.concat(metafile))?;
        let meta = codec::parse_metafile(&bytes)?;
        for out in meta.outs {
            let path = dir.join(&out.path)?;
            if path.is_root() {
                return Err(FsError::InvalidPath(format!(
                    "{} declares the repository root as an output",
                    metafile
                )));
            }
            let record = out.hash_record()?;
            if let Some(previous) = index.outs.get(&path) {
                warn!(
                    path = %path,
                    first = %previous.metafile,
                    second = %metafile,
                    "Output declared twice; keeping the later declaration"
                );
            }
            index.outs.insert(
                path.clone(),
                TrackedOut {
                    path,
                    metafile: metafile.clone(),
                    record,
                },
            );
        }
        Ok(())
    }

    /// Every declared output
    pub fn outs(&self) -> Result<Vec<TrackedOut>, FsError> {
        Ok(self.index()?.outs.values().cloned().collect())
    }

    /// Output equal to or containing `path`
    pub fn out_for(&self, path: &PathKey) -> Result<Option<TrackedOut>, FsError> {
        Ok(self.index()?.owner(path).cloned())
    }

    /// True when `path` or one of its ancestors is a declared output.
    pub fn is_tracked(&self, path: &PathKey) -> Result<bool, FsError> {
        Ok(self.index()?.owner(path).is_some())
    }

    /// Manifest of a directory output, loaded once per output.
    pub fn manifest(&self, out: &TrackedOut) -> Result<Arc<Manifest>, FsError> {
        let Some(record) = out.record.as_ref().filter(|r| r.is_dir()) else {
            return Err(FsError::NotADirectory(out.path.clone()));
        };
        self.manifests.get_or_try_init(&out.path, || {
            debug!(path = %out.path, oid = %record.value(), "Loading manifest");
            self.store.load_manifest(record).map_err(FsError::from)
        })
    }

    fn resolve(&self, path: &PathKey) -> Result<Resolved, FsError> {
        let index = self.index()?;
        if let Some(out) = index.owner(path) {
            if out.path == *path {
                return Ok(Resolved::Out(out.clone()));
            }
            let rel = path.relative_to(&out.path).unwrap_or_default();
            return Ok(Resolved::Inside {
                out: out.clone(),
                rel,
            });
        }
        if path.is_root() || index.descendants(path).next().is_some() {
            return Ok(Resolved::Ancestor);
        }
        Ok(Resolved::Absent)
    }

    /// Recorded hash of `path`: the output's record, a manifest leaf, or the
    /// digest of a manifest subtree. Loads manifests but reads no content.
    pub fn recorded(&self, path: &PathKey) -> Result<Option<HashRecord>, FsError> {
        match self.resolve(path)? {
            Resolved::Out(out) => match out.record.clone() {
                Some(record) if record.is_dir() => {
                    let manifest = self.manifest(&out)?;
                    Ok(Some(record.with_manifest(manifest)))
                }
                other => Ok(other),
            },
            Resolved::Inside { out, rel } => {
                if !matches!(&out.record, Some(r) if r.is_dir()) {
                    return Ok(None);
                }
                let manifest = self.manifest(&out)?;
                if let Some(leaf) = manifest.get(&rel) {
                    return Ok(Some(leaf.clone()));
                }
                match manifest.subtree(&rel) {
                    Some(subtree) => {
                        let algorithm = self.store.algorithm();
                        Ok(Some(hasher::digest_manifest(algorithm, subtree)?))
                    }
                    None => Ok(None),
                }
            }
            Resolved::Ancestor | Resolved::Absent => Ok(None),
        }
    }

    /// Children of `path` with their leaf records. Inside an output they come
    /// in manifest order; above outputs, in index order.
    pub fn list_records(&self, path: &PathKey) -> Result<Vec<(String, EntryKind, Option<HashRecord>)>, FsError> {
        let children = match self.resolve(path)? {
            Resolved::Out(out) => match &out.record {
                Some(record) if record.is_dir() => self.manifest(&out)?.children(&PathKey::root()),
                Some(_) => return Err(FsError::NotADirectory(path.clone())),
                None => return Err(FsError::NotFound(path.clone())),
            },
            Resolved::Inside { out, rel } => {
                if !matches!(&out.record, Some(r) if r.is_dir()) {
                    return Err(FsError::NotFound(path.clone()));
                }
                let manifest = self.manifest(&out)?;
                match manifest.kind_of(&rel) {
                    Some(EntryKind::Directory) => manifest.children(&rel),
                    Some(EntryKind::File) => return Err(FsError::NotADirectory(path.clone())),
                    None => return Err(FsError::NotFound(path.clone())),
                }
            }
            Resolved::Ancestor => {
                let index = self.index()?;
                let depth = path.depth();
                let mut children: Vec<(String, EntryKind, Option<HashRecord>)> = Vec::new();
                for out in index.descendants(path) {
                    let Some(name) = out.path.segments().get(depth) else {
                        continue;
                    };
                    if children.last().map(|(n, _, _)| n == name).unwrap_or(false) {
                        continue;
                    }
                    if out.path.depth() == depth + 1 {
                        let record = out.record.clone();
                        let kind = record.as_ref().map(|r| r.kind).unwrap_or(EntryKind::File);
                        children.push((name.clone(), kind, record.filter(|r| !r.is_dir())));
                    } else {
                        children.push((name.clone(), EntryKind::Directory, None));
                    }
                }
                children
            }
            Resolved::Absent => return Err(FsError::NotFound(path.clone())),
        };
        Ok(children)
    }
}

impl FileSystemView for TrackedFileSystem {
    fn info(&self, path: &PathKey) -> Result<EntryInfo, FsError> {
        let (kind, hash) = match self.resolve(path)? {
            Resolved::Out(out) => match out.record.clone() {
                Some(record) if record.is_dir() => {
                    let manifest = self.manifest(&out)?;
                    (EntryKind::Directory, Some(record.with_manifest(manifest)))
                }
                Some(record) => (EntryKind::File, Some(record)),
                None => return Err(FsError::NotFound(path.clone())),
            },
            Resolved::Inside { out, rel } => {
                if !matches!(&out.record, Some(r) if r.is_dir()) {
                    return Err(FsError::NotFound(path.clone()));
                }
                let manifest = self.manifest(&out)?;
                match manifest.get(&rel) {
                    Some(leaf) => (EntryKind::File, Some(leaf.clone())),
                    None if manifest.contains_dir(&rel) => (EntryKind::Directory, None),
                    None => return Err(FsError::NotFound(path.clone())),
                }
            }
            Resolved::Ancestor => (EntryKind::Directory, None),
            Resolved::Absent => return Err(FsError::NotFound(path.clone())),
        };

        let size = hash.as_ref().and_then(|h| h.size);
        Ok(EntryInfo {
            path: path.clone(),
            kind,
            size,
            hash,
            layer: Layer::Tracked,
            location: None,
            stamp: None,
        })
    }

    fn list_dir(&self, path: &PathKey) -> Result<Vec<DirEntry>, FsError> {
        Ok(self
            .list_records(path)?
            .into_iter()
            .map(|(name, kind, _)| DirEntry { name, kind })
            .collect())
    }

    fn open(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, FsError> {
        let info = self.info(path)?;
        if info.is_dir() {
            return Err(FsError::IsADirectory(path.clone()));
        }
        let record = info.hash.ok_or_else(|| FsError::NotFound(path.clone()))?;
        Ok(self.store.open(&record.value())?)
    }
}
