//! Lazy traversal of a repository view
//!
//! A [`Walk`] is a pull-based iterator yielding one [`WalkEntry`] per
//! directory, depth-first pre-order with names sorted. Nothing is listed
//! until the caller pulls; dropping the iterator ends the traversal.

use crate::error::FsError;
use crate::fs::repo::RepoFileSystem;
use crate::fs::FileSystemView;
use crate::tree::path::PathKey;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// One directory of a walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Directory path relative to the walked repository root
    pub dir: PathKey,
    /// Names of the sub-directories
    pub dirs: Vec<String>,
    /// Names of the files
    pub files: Vec<String>,
}

/// Callback deciding whether a traversal error stops the walk
pub type ErrorHandler<'a> = Box<dyn FnMut(FsError) -> Result<(), FsError> + 'a>;

/// Options for [`RepoFileSystem::walk`]
#[derive(Default)]
pub struct WalkOptions<'a> {
    /// Descend into sub-repositories; defaults to the view's own setting
    pub recurse_subrepos: Option<bool>,
    /// Include metafiles and ignore files in listings
    pub include_metadata_files: bool,
    /// Called with every traversal error. Returning an error aborts the walk
    /// and surfaces it; without a handler errors are logged and the branch
    /// is skipped.
    pub on_error: Option<ErrorHandler<'a>>,
}

impl<'a> WalkOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recurse_subrepos(mut self, recurse: bool) -> Self {
        self.recurse_subrepos = Some(recurse);
        self
    }

    pub fn include_metadata_files(mut self, include: bool) -> Self {
        self.include_metadata_files = include;
        self
    }

    pub fn on_error(mut self, handler: impl FnMut(FsError) -> Result<(), FsError> + 'a) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Abort on the first error.
    pub fn strict(self) -> Self {
        self.on_error(Err)
    }
}

impl fmt::Debug for WalkOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkOptions")
            .field("recurse_subrepos", &self.recurse_subrepos)
            .field("include_metadata_files", &self.include_metadata_files)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// The view a pending directory is listed through
enum ViewRef<'a> {
    Borrowed(&'a RepoFileSystem),
    Shared(Arc<RepoFileSystem>),
}

impl Deref for ViewRef<'_> {
    type Target = RepoFileSystem;

    fn deref(&self) -> &RepoFileSystem {
        match self {
            ViewRef::Borrowed(fs) => fs,
            ViewRef::Shared(fs) => fs,
        }
    }
}

impl Clone for ViewRef<'_> {
    fn clone(&self) -> Self {
        match self {
            ViewRef::Borrowed(fs) => ViewRef::Borrowed(fs),
            ViewRef::Shared(fs) => ViewRef::Shared(fs.clone()),
        }
    }
}

struct Pending<'a> {
    view: ViewRef<'a>,
    /// Path inside `view`
    local: PathKey,
    /// Path reported to the caller
    display: PathKey,
}

/// Lazy directory traversal
pub struct Walk<'a> {
    fs: &'a RepoFileSystem,
    top: Option<PathKey>,
    stack: Vec<Pending<'a>>,
    recurse: bool,
    include_metadata: bool,
    on_error: Option<ErrorHandler<'a>>,
    done: bool,
}

impl<'a> Walk<'a> {
    pub(crate) fn new(fs: &'a RepoFileSystem, top: PathKey, options: WalkOptions<'a>) -> Self {
        Self {
            fs,
            top: Some(top),
            stack: Vec::new(),
            recurse: options.recurse_subrepos.unwrap_or(fs.options().subrepos),
            include_metadata: options.include_metadata_files,
            on_error: options.on_error,
            done: false,
        }
    }

    /// Resolve the starting directory, descending through boundaries.
    fn start(&self, top: &PathKey) -> Result<Pending<'a>, FsError> {
        let mut view = ViewRef::Borrowed(self.fs);
        let mut base = PathKey::root();
        for prefix in top.prefixes() {
            let local = prefix.relative_to(&base).unwrap_or_default();
            if !view.is_boundary(&local) {
                continue;
            }
            if prefix == *top && !self.recurse {
                break;
            }
            if !self.recurse {
                return Err(FsError::NotFound(top.clone()));
            }
            view = ViewRef::Shared(view.subrepo(&local)?);
            base = prefix;
        }

        let local = top.relative_to(&base).unwrap_or_default();
        let info = view.info(&local)?;
        if !info.is_dir() {
            return Err(FsError::NotADirectory(top.clone()));
        }
        Ok(Pending {
            view,
            local,
            display: top.clone(),
        })
    }

    /// List one directory and queue its sub-directories.
    fn expand(&mut self, pending: Pending<'a>) -> Result<WalkEntry, FsError> {
        let Pending {
            view,
            local,
            display,
        } = pending;
        let opaque = !self.recurse && !local.is_root() && view.is_boundary(&local);
        let listing = if opaque {
            Vec::new()
        } else {
            view.list_dir_with(&local, self.include_metadata)?
        };

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut queued = Vec::new();
        for entry in listing {
            if !entry.kind.is_dir() {
                files.push(entry.name);
                continue;
            }
            let child = local.child(&entry.name);
            let child_display = display.child(&entry.name);
            if view.is_boundary(&child) {
                if self.recurse {
                    // A broken sub-repository only skips its own branch.
                    match view.subrepo(&child) {
                        Ok(subrepo) => {
                            debug!(path = %child_display, "Descending into sub-repository");
                            queued.push(Pending {
                                view: ViewRef::Shared(subrepo),
                                local: PathKey::root(),
                                display: child_display,
                            });
                        }
                        Err(e) => {
                            if let Some(fatal) = self.handle(e) {
                                self.done = true;
                                self.stack.clear();
                                return Err(fatal);
                            }
                        }
                    }
                }
            } else {
                queued.push(Pending {
                    view: view.clone(),
                    local: child,
                    display: child_display,
                });
            }
            dirs.push(entry.name);
        }

        // Reverse so the first name is popped first.
        self.stack.extend(queued.into_iter().rev());
        Ok(WalkEntry {
            dir: display,
            dirs,
            files,
        })
    }

    /// Route an error through the handler. `Some` aborts the walk.
    fn handle(&mut self, err: FsError) -> Option<FsError> {
        match self.on_error.as_mut() {
            Some(handler) => handler(err).err(),
            None => {
                debug!(error = %err, "Skipping unreadable directory");
                None
            }
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<WalkEntry, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(top) = self.top.take() {
            match self.start(&top) {
                Ok(pending) => self.stack.push(pending),
                Err(e) => {
                    if let Some(fatal) = self.handle(e) {
                        self.done = true;
                        return Some(Err(fatal));
                    }
                }
            }
        }

        while let Some(pending) = self.stack.pop() {
            match self.expand(pending) {
                Ok(entry) => return Some(Ok(entry)),
                // Already routed through the handler by `expand`.
                Err(fatal) if self.done => return Some(Err(fatal)),
                Err(e) => {
                    if let Some(fatal) = self.handle(e) {
                        self.done = true;
                        self.stack.clear();
                        return Some(Err(fatal));
                    }
                }
            }
        }
        self.done = true;
        None
    }
}
