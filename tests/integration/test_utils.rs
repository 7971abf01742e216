//! Shared test utilities for integration tests
//!
//! Repository fixtures on temporary directories, plus serialized access to
//! the environment for tests that change XDG or `CASK__` variables.

use cask::config::CONFIG_FILE;
use cask::fs::{RepoFileSystem, RepoFsOptions};
use cask::repo::{OpenOptions, RepoContext, MARKER_DIR};
use cask::stage;
use cask::tree::node::HashRecord;
use cask::PathKey;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Global mutex serializing environment variable access across tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

pub fn key(s: &str) -> PathKey {
    PathKey::parse(s).unwrap()
}

/// Initialize a repository at `root` with the persistent hash state off, so
/// several contexts can open the same root.
pub fn init_repo(root: &Path) -> PathBuf {
    let root = RepoContext::init(root).unwrap();
    fs::write(
        root.join(MARKER_DIR).join(CONFIG_FILE),
        "[core]\nstate = false\n",
    )
    .unwrap();
    root
}

/// Temporary repository with helpers for writing files and opening views
pub struct TestRepo {
    _temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = init_repo(temp_dir.path());
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        key(rel).to_path(&self.root)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    pub fn mkdir(&self, rel: &str) {
        fs::create_dir_all(self.path(rel)).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        let path = self.path(rel);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
    }

    /// Nested repository at `rel`
    pub fn init_subrepo(&self, rel: &str) -> PathBuf {
        init_repo(&self.path(rel))
    }

    pub fn open(&self) -> RepoFileSystem {
        open_at(&self.root, OpenOptions::new(), false)
    }

    pub fn open_with_subrepos(&self) -> RepoFileSystem {
        open_at(&self.root, OpenOptions::new(), true)
    }

    /// Track `rel` through a fresh view and return its record.
    pub fn track(&self, rel: &str) -> HashRecord {
        track_at(&self.root, rel)
    }

    /// `dir` with `foo`, `bar` and `subdir/data`
    pub fn write_dir_fixture(&self, dir: &str) {
        self.write(&format!("{}/foo", dir), "foo");
        self.write(&format!("{}/bar", dir), "bar");
        self.write(&format!("{}/subdir/data", dir), "data");
    }
}

pub fn open_at(root: &Path, options: OpenOptions, subrepos: bool) -> RepoFileSystem {
    let context = RepoContext::open_with(root, options).unwrap();
    RepoFileSystem::with_options(
        Arc::new(context),
        RepoFsOptions::default().with_subrepos(subrepos),
    )
    .unwrap()
}

pub fn track_at(root: &Path, rel: &str) -> HashRecord {
    let view = open_at(root, OpenOptions::new(), false);
    stage::add(&view, &key(rel), 2).unwrap().record
}

pub fn names(entries: Vec<cask::fs::DirEntry>) -> Vec<String> {
    entries.into_iter().map(|entry| entry.name).collect()
}

/// Run `f` with `vars` set, restoring the previous values afterwards.
pub fn with_env<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(name, _)| (name.to_string(), std::env::var(name).ok()))
        .collect();
    for (name, value) in vars {
        std::env::set_var(name, value);
    }

    let result = f();

    for (name, value) in saved {
        match value {
            Some(value) => std::env::set_var(&name, value),
            None => std::env::remove_var(&name),
        }
    }
    result
}
