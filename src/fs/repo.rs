//! Composite repository view
//!
//! Overlays a working layer (the working directory, or the committed tree of
//! a pinned revision) with the entries recorded in metafiles, and delegates
//! paths below nested repository boundaries to the sub-repository's own view.
//!
//! Resolution order for a path:
//!
//! 1. below a sub-repository boundary: the sub-repository's view, when
//!    sub-repositories are enabled; otherwise the boundary is an opaque
//!    directory and everything below it is absent
//! 2. the working layer
//! 3. the tracked entries, when the tracked output is absent from the working
//!    layer
//!
//! Listings merge the working layer and the tracked entries by name, with the
//! working layer winning type conflicts.

use crate::error::FsError;
use crate::fs::walk::{Walk, WalkOptions};
use crate::fs::{
    DirEntry, EntryInfo, FileSystemView, ScmTreeFs, TrackedFileSystem, WorkingLayer, WorkspaceFs,
};
use crate::repo::{RepoContext, SubrepoRegistry};
use crate::scm::{ScmTree, WorkspaceTree};
use crate::store::codec::is_metadata_name;
use crate::tree::engine::HashEngine;
use crate::tree::hasher::Algorithm;
use crate::tree::node::HashRecord;
use crate::tree::path::PathKey;
use crate::types::{DirtyState, EntryKind};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Behaviour switches for a [`RepoFileSystem`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoFsOptions {
    /// Delegate paths below sub-repository boundaries to their own views
    pub subrepos: bool,
}

impl RepoFsOptions {
    pub fn with_subrepos(mut self, subrepos: bool) -> Self {
        self.subrepos = subrepos;
        self
    }
}

/// Which view answers for a path
pub(crate) enum Owner {
    Local,
    Subrepo {
        fs: Arc<RepoFileSystem>,
        rel: PathKey,
    },
    /// The path is a boundary that is not descended into
    Opaque,
    /// The path lies below a boundary that is not descended into
    Hidden,
}

/// Where a locally owned entry was found
enum Located {
    Working(EntryInfo),
    Tracked(EntryInfo),
}

/// Unified view over one repository and its sub-repositories
pub struct RepoFileSystem {
    context: Arc<RepoContext>,
    working: Box<dyn WorkingLayer>,
    tracked: TrackedFileSystem,
    engine: HashEngine,
    registry: SubrepoRegistry,
    options: RepoFsOptions,
}

impl RepoFileSystem {
    /// View with options taken from the repository configuration
    pub fn new(context: Arc<RepoContext>) -> Result<Self, FsError> {
        let options = RepoFsOptions::default().with_subrepos(context.config().core.subrepos);
        Self::with_options(context, options)
    }

    pub fn with_options(context: Arc<RepoContext>, options: RepoFsOptions) -> Result<Self, FsError> {
        let store = context.store();
        let (working, tracked): (Box<dyn WorkingLayer>, TrackedFileSystem) = match context.rev() {
            None => {
                let working = WorkspaceFs::open_root(context.root())?;
                let tree: Arc<dyn ScmTree> = Arc::new(WorkspaceTree::new(context.root()));
                (
                    Box::new(working),
                    TrackedFileSystem::new(tree, PathKey::root(), store),
                )
            }
            Some(rev) => {
                let scm = context.scm();
                let revision = scm.resolve_revision(rev)?;
                let tree = scm.get_tree(&revision)?;
                let prefix = context.scm_prefix().clone();
                let working = ScmTreeFs::new(tree.clone(), prefix.clone())?;
                (
                    Box::new(working),
                    TrackedFileSystem::new(tree, prefix, store),
                )
            }
        };

        debug!(
            root = %context.root().display(),
            rev = context.rev().unwrap_or("-"),
            subrepos = options.subrepos,
            "Repository view created"
        );
        Ok(Self {
            engine: HashEngine::new(context.state()),
            context,
            working,
            tracked,
            registry: SubrepoRegistry::new(),
            options,
        })
    }

    pub fn context(&self) -> &Arc<RepoContext> {
        &self.context
    }

    pub fn root(&self) -> &Path {
        self.context.root()
    }

    pub fn options(&self) -> RepoFsOptions {
        self.options
    }

    pub fn engine(&self) -> &HashEngine {
        &self.engine
    }

    pub fn tracked(&self) -> &TrackedFileSystem {
        &self.tracked
    }

    /// The working layer alone, without tracked fallback
    pub fn working(&self) -> &dyn FileSystemView {
        self.working.as_view()
    }

    pub fn registry(&self) -> &SubrepoRegistry {
        &self.registry
    }

    /// Key of an absolute or root-relative path.
    pub fn key(&self, path: impl AsRef<Path>) -> Result<PathKey, FsError> {
        self.context.key(path)
    }

    /// True when `path` is the root of a nested repository.
    pub fn is_boundary(&self, path: &PathKey) -> bool {
        self.working.is_repo_root(path)
    }

    /// View of the nested repository rooted at `boundary`.
    pub fn subrepo(&self, boundary: &PathKey) -> Result<Arc<RepoFileSystem>, FsError> {
        self.registry
            .get_or_create(&self.context, boundary, self.options)
    }

    /// Drop the tracked index, memoized digests and every sub-repository
    /// view.
    pub fn reset(&self) {
        self.tracked.reset();
        self.engine.clear();
        self.registry.reset();
        debug!(root = %self.root().display(), "Repository view reset");
    }

    pub(crate) fn owner(&self, path: &PathKey) -> Result<Owner, FsError> {
        for prefix in path.prefixes() {
            if prefix.is_root() || !self.working.is_repo_root(&prefix) {
                continue;
            }
            if self.options.subrepos {
                let fs = self.subrepo(&prefix)?;
                let rel = path.relative_to(&prefix).unwrap_or_default();
                return match fs.owner(&rel)? {
                    Owner::Local => Ok(Owner::Subrepo { fs, rel }),
                    nested => Ok(nested),
                };
            }
            if prefix == *path {
                return Ok(Owner::Opaque);
            }
            return Ok(Owner::Hidden);
        }
        Ok(Owner::Local)
    }

    fn locate(&self, path: &PathKey) -> Result<Located, FsError> {
        match self.working.info(path) {
            Ok(info) => return Ok(Located::Working(info)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if let Some(out) = self.tracked.out_for(path)? {
            if out.path != *path && self.working.exists(&out.path) {
                return Err(FsError::NotFound(path.clone()));
            }
        }
        let info = self.tracked.info(path)?;
        trace!(path = %path, "Resolved from tracked entries");
        Ok(Located::Tracked(info))
    }

    fn local_info(&self, path: &PathKey) -> Result<EntryInfo, FsError> {
        match self.locate(path)? {
            Located::Tracked(info) => Ok(info),
            Located::Working(mut info) => {
                if let Some(hash) = self.proven_clean(&info)? {
                    info.hash = Some(hash);
                }
                Ok(info)
            }
        }
    }

    /// Recorded hash of a working file when the memo already shows the
    /// working copy matches it. Never hashes.
    fn proven_clean(&self, info: &EntryInfo) -> Result<Option<HashRecord>, FsError> {
        let (Some(location), Some(stamp)) = (info.location.as_ref(), info.stamp) else {
            return Ok(None);
        };
        if !info.is_file() {
            return Ok(None);
        }
        let recorded = match self.tracked.recorded(&info.path) {
            Ok(Some(recorded)) => recorded,
            Ok(None) => return Ok(None),
            Err(e) if e.is_object_missing() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self
            .engine
            .peek(location, stamp, recorded.algorithm)
            .filter(|current| *current == recorded)
            .map(|_| recorded))
    }

    fn list_local(&self, path: &PathKey, include_metadata: bool) -> Result<Vec<DirEntry>, FsError> {
        let mut merged: BTreeMap<String, EntryKind> = BTreeMap::new();
        let tracked_children = match self.locate(path)? {
            Located::Working(info) => {
                if !info.is_dir() {
                    return Err(FsError::NotADirectory(path.clone()));
                }
                for entry in self.working.list_dir(path)? {
                    merged.insert(entry.name, entry.kind);
                }
                // Inside a tracked output present on disk, the disk is authoritative.
                self.tracked.out_for(path)?.is_none()
            }
            Located::Tracked(info) => {
                if !info.is_dir() {
                    return Err(FsError::NotADirectory(path.clone()));
                }
                true
            }
        };

        if tracked_children {
            match self.tracked.list_dir(path) {
                Ok(entries) => {
                    for entry in entries {
                        merged.entry(entry.name).or_insert(entry.kind);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(merged
            .into_iter()
            .filter(|(name, _)| include_metadata || !is_metadata_name(name))
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }

    /// Children of `path`, optionally including metafiles and ignore files
    pub fn list_dir_with(&self, path: &PathKey, include_metadata: bool) -> Result<Vec<DirEntry>, FsError> {
        match self.owner(path)? {
            Owner::Local => self.list_local(path, include_metadata),
            Owner::Subrepo { fs, rel } => fs.list_dir_with(&rel, include_metadata),
            Owner::Opaque => Ok(Vec::new()),
            Owner::Hidden => Err(FsError::NotFound(path.clone())),
        }
    }

    /// True when `path` or one of its ancestors is recorded in a metafile.
    pub fn is_tracked(&self, path: &PathKey) -> Result<bool, FsError> {
        match self.owner(path)? {
            Owner::Local => self.tracked.is_tracked(path),
            Owner::Subrepo { fs, rel } => fs.is_tracked(&rel),
            Owner::Opaque | Owner::Hidden => Ok(false),
        }
    }

    /// Classify `path` against its recorded entry.
    #[instrument(skip(self), fields(root = %self.root().display()))]
    pub fn dirty_state(&self, path: &PathKey) -> Result<DirtyState, FsError> {
        match self.owner(path)? {
            Owner::Local => {}
            Owner::Subrepo { fs, rel } => return fs.dirty_state(&rel),
            Owner::Opaque => return Ok(DirtyState::Untracked),
            Owner::Hidden => return Err(FsError::NotFound(path.clone())),
        }

        let recorded = self.tracked.recorded(path)?;
        let working = match self.working.info(path) {
            Ok(info) => Some(info),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let state = match (recorded, working) {
            (None, Some(_)) => DirtyState::Untracked,
            (None, None) => return Err(FsError::NotFound(path.clone())),
            (Some(recorded), Some(info)) => {
                let current = self
                    .engine
                    .hash_entry(self.working.as_view(), &info, recorded.algorithm)?;
                if current == recorded {
                    DirtyState::Clean
                } else {
                    DirtyState::Modified
                }
            }
            (Some(recorded), None) => {
                if self.tracked.store().contains_record(&recorded) {
                    DirtyState::Clean
                } else {
                    DirtyState::Missing
                }
            }
        };
        debug!(path = %path, ?state, "Dirty state");
        Ok(state)
    }

    /// Content identity of `path`
    pub fn get_hash(&self, path: &PathKey, algorithm: Algorithm) -> Result<HashRecord, FsError> {
        match self.owner(path)? {
            Owner::Subrepo { fs, rel } => fs.get_hash(&rel, algorithm),
            Owner::Hidden => Err(FsError::NotFound(path.clone())),
            Owner::Local | Owner::Opaque => self.engine.get_hash(self, path, algorithm),
        }
    }

    /// Content identity of `path` with the repository's configured algorithm
    pub fn hash(&self, path: &PathKey) -> Result<HashRecord, FsError> {
        self.get_hash(path, self.context.config().core.algorithm)
    }

    /// Lazy depth-first traversal starting at `top`.
    pub fn walk<'a>(&'a self, top: &PathKey, options: WalkOptions<'a>) -> Walk<'a> {
        Walk::new(self, top.clone(), options)
    }
}

impl FileSystemView for RepoFileSystem {
    fn info(&self, path: &PathKey) -> Result<EntryInfo, FsError> {
        match self.owner(path)? {
            Owner::Local => self.local_info(path),
            Owner::Subrepo { fs, rel } => {
                let mut info = fs.info(&rel)?;
                info.path = path.clone();
                Ok(info)
            }
            Owner::Opaque => {
                let mut info = self.working.info(path)?;
                info.hash = None;
                Ok(info)
            }
            Owner::Hidden => Err(FsError::NotFound(path.clone())),
        }
    }

    fn list_dir(&self, path: &PathKey) -> Result<Vec<DirEntry>, FsError> {
        self.list_dir_with(path, false)
    }

    fn open(&self, path: &PathKey) -> Result<Box<dyn Read + Send>, FsError> {
        match self.owner(path)? {
            Owner::Local => match self.locate(path)? {
                Located::Working(_) => self.working.open(path),
                Located::Tracked(_) => self.tracked.open(path),
            },
            Owner::Subrepo { fs, rel } => fs.open(&rel),
            Owner::Opaque => Err(FsError::IsADirectory(path.clone())),
            Owner::Hidden => Err(FsError::NotFound(path.clone())),
        }
    }
}

impl std::fmt::Debug for RepoFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoFileSystem")
            .field("root", &self.context.root())
            .field("layer", &self.working.layer())
            .field("options", &self.options)
            .field("subrepos", &self.registry.len())
            .finish()
    }
}
