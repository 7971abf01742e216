//! Registry of nested repository views
//!
//! Views are built on first access through the parent's [`RepoFactory`] and
//! reused afterwards. Concurrent first accesses to one boundary build it
//! once; a failed build is not remembered.

use crate::concurrency::SingleFlight;
use crate::error::FsError;
use crate::fs::{RepoFileSystem, RepoFsOptions};
use crate::repo::RepoContext;
use crate::tree::path::PathKey;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Nested repository views keyed by absolute boundary path
#[derive(Default)]
pub struct SubrepoRegistry {
    views: SingleFlight<PathBuf, Arc<RepoFileSystem>>,
}

impl SubrepoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// View of the nested repository at `boundary` (relative to `parent`).
    pub fn get_or_create(
        &self,
        parent: &RepoContext,
        boundary: &PathKey,
        options: RepoFsOptions,
    ) -> Result<Arc<RepoFileSystem>, FsError> {
        let root = boundary.to_path(parent.root());
        self.views.get_or_try_init(&root, || {
            debug!(boundary = %boundary, "Opening sub-repository");
            let wrap = |source: FsError| FsError::Subrepo {
                path: root.clone(),
                source: Box::new(source),
            };
            let context = parent
                .factory()
                .create(&root, parent.subrepo_params())
                .map_err(wrap)?;
            let view = RepoFileSystem::with_options(Arc::new(context), options).map_err(wrap)?;
            info!(root = %root.display(), "Sub-repository opened");
            Ok(Arc::new(view))
        })
    }

    /// Already-built view for an absolute boundary path
    pub fn get(&self, root: &PathBuf) -> Option<Arc<RepoFileSystem>> {
        self.views.get(root)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Absolute roots of every built view
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots = self.views.keys();
        roots.sort();
        roots
    }

    /// Drop every built view.
    pub fn reset(&self) {
        self.views.clear();
    }
}
