//! Repository contexts
//!
//! A [`RepoContext`] bundles everything views over one repository need:
//! root, configuration, SCM handle, object store, hash state and the
//! optional pinned revision. Nested repositories get their own context from
//! a [`RepoFactory`], sharing the parent's cache and SCM.

pub mod subrepos;

pub use subrepos::SubrepoRegistry;

use crate::config::{CaskConfig, ConfigLoader, CONFIG_FILE, LOCAL_CONFIG_FILE};
use crate::error::FsError;
use crate::ignore::{GITIGNORE_FILE, IGNORE_FILE};
use crate::scm::{Scm, WorkspaceScm};
use crate::store::{HashState, LocalObjectStore, ObjectStore, SledStateStore};
use crate::tree::path::{self, PathKey};
use crate::types::EntryKind;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Directory marking a repository root
pub const MARKER_DIR: &str = ".cask";

const STATE_DIR: &str = "tmp/state";

/// Parameters a parent hands to the factory building a nested repository
#[derive(Clone)]
pub struct SubrepoParams {
    pub cache_dir: PathBuf,
    pub cache_types: Vec<String>,
    pub scm: Arc<dyn Scm>,
    pub rev: Option<String>,
    pub factory: Arc<dyn RepoFactory>,
}

impl fmt::Debug for SubrepoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubrepoParams")
            .field("cache_dir", &self.cache_dir)
            .field("cache_types", &self.cache_types)
            .field("scm_root", &self.scm.root())
            .field("rev", &self.rev)
            .finish()
    }
}

/// Builds contexts for nested repositories
pub trait RepoFactory: Send + Sync {
    fn create(&self, root: &Path, params: SubrepoParams) -> Result<RepoContext, FsError>;
}

/// Factory opening nested repositories with [`RepoContext::open_with`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRepoFactory;

impl RepoFactory for DefaultRepoFactory {
    fn create(&self, root: &Path, params: SubrepoParams) -> Result<RepoContext, FsError> {
        RepoContext::open_with(root, OpenOptions::for_subrepo(params))
    }
}

/// Overrides for [`RepoContext::open_with`]
#[derive(Default, Clone)]
pub struct OpenOptions {
    pub config: Option<CaskConfig>,
    pub cache_dir: Option<PathBuf>,
    pub cache_types: Option<Vec<String>>,
    pub scm: Option<Arc<dyn Scm>>,
    pub rev: Option<String>,
    pub factory: Option<Arc<dyn RepoFactory>>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CaskConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_types(mut self, types: Vec<String>) -> Self {
        self.cache_types = Some(types);
        self
    }

    pub fn scm(mut self, scm: Arc<dyn Scm>) -> Self {
        self.scm = Some(scm);
        self
    }

    /// Pin every view to a committed revision.
    pub fn rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn factory(mut self, factory: Arc<dyn RepoFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn for_subrepo(params: SubrepoParams) -> Self {
        Self {
            config: None,
            cache_dir: Some(params.cache_dir),
            cache_types: Some(params.cache_types),
            scm: Some(params.scm),
            rev: params.rev,
            factory: Some(params.factory),
        }
    }
}

/// Everything needed to build views over one repository
pub struct RepoContext {
    root: PathBuf,
    config: CaskConfig,
    scm: Arc<dyn Scm>,
    scm_prefix: PathKey,
    store: Arc<LocalObjectStore>,
    state: Option<Arc<dyn HashState>>,
    rev: Option<String>,
    factory: Arc<dyn RepoFactory>,
}

impl fmt::Debug for RepoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoContext")
            .field("root", &self.root)
            .field("scm_prefix", &self.scm_prefix)
            .field("cache_dir", &self.store.root())
            .field("rev", &self.rev)
            .finish()
    }
}

impl RepoContext {
    /// Create the marker directory and default files under `root`.
    pub fn init(root: &Path) -> Result<PathBuf, FsError> {
        fs::create_dir_all(root).map_err(|e| FsError::io(root, e))?;
        let root = path::canonicalize_root(root)?;
        let marker = root.join(MARKER_DIR);
        if marker.is_dir() {
            return Err(FsError::Config(format!(
                "{} is already a cask repository",
                root.display()
            )));
        }

        fs::create_dir_all(&marker).map_err(|e| FsError::io(&marker, e))?;
        write_new(&marker.join(CONFIG_FILE), "")?;
        write_new(
            &marker.join(GITIGNORE_FILE),
            &format!("/cache\n/tmp\n/{}\n", LOCAL_CONFIG_FILE),
        )?;
        write_new(
            &root.join(IGNORE_FILE),
            "# Add patterns of files cask should ignore\n",
        )?;
        info!(root = %root.display(), "Initialized repository");
        Ok(root)
    }

    pub fn open(root: &Path) -> Result<Self, FsError> {
        Self::open_with(root, OpenOptions::default())
    }

    #[instrument(skip_all, fields(root = %root.display()))]
    pub fn open_with(root: &Path, options: OpenOptions) -> Result<Self, FsError> {
        let root = path::canonicalize_root(root)?;
        let scm: Arc<dyn Scm> = match options.scm {
            Some(scm) => scm,
            None => Arc::new(WorkspaceScm::new(root.clone())),
        };
        let scm_prefix = PathKey::from_path(scm.root(), &root).map_err(|_| {
            FsError::InvalidPath(format!(
                "{} is outside of the SCM root {}",
                root.display(),
                scm.root().display()
            ))
        })?;

        let has_marker = match &options.rev {
            Some(rev) => {
                let revision = scm.resolve_revision(rev)?;
                let tree = scm.get_tree(&revision)?;
                matches!(
                    tree.stat(&scm_prefix.child(MARKER_DIR))?,
                    Some(stat) if stat.kind == EntryKind::Directory
                )
            }
            None => root.join(MARKER_DIR).is_dir(),
        };
        if !has_marker {
            return Err(FsError::NotARepository(root));
        }

        let mut config = match options.config {
            Some(config) => config,
            None => ConfigLoader::load(&root)?,
        };
        if let Some(dir) = options.cache_dir {
            config.cache.dir = Some(dir);
        }
        if let Some(types) = options.cache_types {
            config.cache.types = types;
        }
        config.validate()?;

        let store = Arc::new(
            LocalObjectStore::new(config.cache_dir(&root), config.core.algorithm)
                .with_cache_types(config.cache.types.clone()),
        );

        let state = if config.core.state && options.rev.is_none() {
            open_state(&root)
        } else {
            None
        };

        Ok(Self {
            root,
            config,
            scm,
            scm_prefix,
            store,
            state,
            rev: options.rev,
            factory: options.factory.unwrap_or_else(|| Arc::new(DefaultRepoFactory)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CaskConfig {
        &self.config
    }

    pub fn scm(&self) -> &Arc<dyn Scm> {
        &self.scm
    }

    /// Location of the repository root inside the SCM root
    pub fn scm_prefix(&self) -> &PathKey {
        &self.scm_prefix
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn cache_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn cache_types(&self) -> &[String] {
        self.store.cache_types()
    }

    pub fn state(&self) -> Option<Arc<dyn HashState>> {
        self.state.clone()
    }

    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    pub fn factory(&self) -> &Arc<dyn RepoFactory> {
        &self.factory
    }

    /// Resolve an absolute or root-relative path to a key.
    pub fn key(&self, path: impl AsRef<Path>) -> Result<PathKey, FsError> {
        PathKey::from_path(&self.root, path.as_ref())
    }

    /// Parameters for a nested repository: same cache, SCM, revision and
    /// factory.
    pub fn subrepo_params(&self) -> SubrepoParams {
        SubrepoParams {
            cache_dir: self.store.root().to_path_buf(),
            cache_types: self.store.cache_types().to_vec(),
            scm: self.scm.clone(),
            rev: self.rev.clone(),
            factory: self.factory.clone(),
        }
    }
}

fn write_new(path: &Path, contents: &str) -> Result<(), FsError> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, contents).map_err(|e| FsError::io(path, e))
}

fn open_state(root: &Path) -> Option<Arc<dyn HashState>> {
    let path = root.join(MARKER_DIR).join(STATE_DIR);
    match SledStateStore::open(&path) {
        Ok(state) => Some(Arc::new(state)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Hash state unavailable; digests are memoized in memory only"
            );
            None
        }
    }
}
