//! Integration tests for nested repositories

use super::test_utils::{key, names, open_at, track_at, TestRepo};
use cask::error::FsError;
use cask::fs::FileSystemView;
use cask::repo::{DefaultRepoFactory, OpenOptions, RepoContext, RepoFactory, SubrepoParams};
use cask::tree::hasher::Algorithm;
use cask::{DirtyState, PathKey, WalkEntry, WalkOptions};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Parent with `sub1/foo` tracked then deleted and `sub2/bar` tracked
fn sibling_subrepos() -> TestRepo {
    let repo = TestRepo::new();
    let sub1 = repo.init_subrepo("sub1");
    let sub2 = repo.init_subrepo("sub2");
    repo.write("sub1/foo", "foo");
    repo.write("sub2/bar", "bar");
    track_at(&sub1, "foo");
    track_at(&sub2, "bar");
    repo.remove("sub1/foo");
    repo
}

fn entry(dir: &str, dirs: &[&str], files: &[&str]) -> WalkEntry {
    WalkEntry {
        dir: if dir == "." { PathKey::root() } else { key(dir) },
        dirs: dirs.iter().map(|s| s.to_string()).collect(),
        files: files.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn test_walk_descends_into_subrepos() {
    let repo = sibling_subrepos();
    let view = repo.open_with_subrepos();

    let entries: Vec<WalkEntry> = view
        .walk(&PathKey::root(), WalkOptions::new().strict())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        entries,
        vec![
            entry(".", &["sub1", "sub2"], &[]),
            entry("sub1", &[], &[".gitignore", "foo"]),
            entry("sub2", &[], &[".gitignore", "bar"]),
        ]
    );
    assert_eq!(view.registry().len(), 2);

    let again = view.walk(&PathKey::root(), WalkOptions::new()).count();
    assert_eq!(again, 3);
    assert_eq!(view.registry().len(), 2);
}

#[test]
fn test_walk_without_recursion_stops_at_boundaries() {
    let repo = sibling_subrepos();
    let view = repo.open();

    let entries: Vec<WalkEntry> = view
        .walk(&PathKey::root(), WalkOptions::new())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries, vec![entry(".", &["sub1", "sub2"], &[])]);
    assert!(view.registry().is_empty());

    let below: Vec<_> = view
        .walk(&key("sub1"), WalkOptions::new().strict())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(below, vec![entry("sub1", &[], &[])]);
}

#[test]
fn test_walk_option_overrides_view_setting() {
    let repo = sibling_subrepos();
    let view = repo.open();

    let dirs: Vec<String> = view
        .walk(&PathKey::root(), WalkOptions::new().recurse_subrepos(true))
        .map(|entry| entry.unwrap().dir.to_string())
        .collect();
    assert_eq!(dirs, vec![".", "sub1", "sub2"]);
}

#[test]
fn test_walk_with_metadata_files() {
    let repo = sibling_subrepos();
    let view = repo.open_with_subrepos();

    let entries: Vec<WalkEntry> = view
        .walk(
            &PathKey::root(),
            WalkOptions::new().include_metadata_files(true).strict(),
        )
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries[0].files, vec![".caskignore"]);
    assert_eq!(
        entries[1].files,
        vec![".caskignore", ".gitignore", "foo", "foo.cask"]
    );
    assert_eq!(
        entries[2].files,
        vec![".caskignore", ".gitignore", "bar", "bar.cask"]
    );
}

#[test]
fn test_paths_inside_subrepo_resolve_through_its_view() {
    let repo = sibling_subrepos();
    let view = repo.open_with_subrepos();

    assert!(view.is_file(&key("sub1/foo")));
    assert_eq!(view.info(&key("sub1/foo")).unwrap().path, key("sub1/foo"));
    assert_eq!(
        view.get_hash(&key("sub1/foo"), Algorithm::Md5).unwrap().digest,
        "acbd18db4cc2f85cedef654fccc4a4d8"
    );
    assert!(view.is_tracked(&key("sub2/bar")).unwrap());
    assert_eq!(view.dirty_state(&key("sub2/bar")).unwrap(), DirtyState::Clean);
    assert_eq!(names(view.list_dir(&key("sub2")).unwrap()), vec![".gitignore", "bar"]);

    let child = view.subrepo(&key("sub1")).unwrap();
    assert_eq!(child.context().cache_dir(), view.context().cache_dir());
    assert_eq!(child.context().scm_prefix().as_posix(), "sub1");
}

#[test]
fn test_subrepo_contents_hidden_when_disabled() {
    let repo = sibling_subrepos();
    let view = repo.open();

    assert!(view.is_dir(&key("sub2")));
    assert!(view.list_dir(&key("sub2")).unwrap().is_empty());
    assert!(!view.exists(&key("sub2/bar")));
    assert!(!view.is_tracked(&key("sub2/bar")).unwrap());
    assert_eq!(view.dirty_state(&key("sub2")).unwrap(), DirtyState::Untracked);
    assert!(view.registry().is_empty());
}

#[test]
fn test_reset_drops_subrepo_views() {
    let repo = sibling_subrepos();
    let view = repo.open_with_subrepos();
    assert!(view.exists(&key("sub1/foo")));
    assert!(view.exists(&key("sub2/bar")));
    assert_eq!(view.registry().len(), 2);

    view.reset();
    assert!(view.registry().is_empty());
}

struct CountingFactory {
    created: AtomicUsize,
}

impl RepoFactory for CountingFactory {
    fn create(&self, root: &Path, params: SubrepoParams) -> Result<RepoContext, FsError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        DefaultRepoFactory.create(root, params)
    }
}

#[test]
fn test_concurrent_first_access_builds_once() {
    let repo = TestRepo::new();
    let sub = repo.init_subrepo("sub");
    repo.write("sub/foo", "foo");
    track_at(&sub, "foo");

    let factory = Arc::new(CountingFactory {
        created: AtomicUsize::new(0),
    });
    let view = open_at(
        &repo.root,
        OpenOptions::new().factory(factory.clone()),
        true,
    );

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| assert!(view.exists(&key("sub/foo"))));
        }
    });
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(view.registry().roots(), vec![sub]);
}

#[test]
fn test_failed_subrepo_is_retried() {
    let repo = TestRepo::new();
    repo.init_subrepo("sub");
    repo.write("sub/foo", "foo");
    repo.write("sub/.cask/config.toml", "[core\n");

    let view = repo.open_with_subrepos();
    match view.info(&key("sub/foo")) {
        Err(FsError::Subrepo { path, .. }) => assert_eq!(path, repo.path("sub")),
        other => panic!("expected a sub-repository error, got {:?}", other.map(|i| i.path)),
    }
    assert!(view.registry().is_empty());

    repo.write("sub/.cask/config.toml", "[core]\nstate = false\n");
    assert!(view.is_file(&key("sub/foo")));
    assert_eq!(view.registry().len(), 1);
}

#[test]
fn test_broken_subrepo_skips_only_its_branch() {
    let repo = TestRepo::new();
    repo.write("keep.txt", "keep");
    repo.write("plain/a", "a");
    repo.init_subrepo("sub");
    repo.write("sub/foo", "foo");
    repo.write("sub/.cask/config.toml", "[core\n");
    let view = repo.open_with_subrepos();

    let entries: Vec<WalkEntry> = view
        .walk(&PathKey::root(), WalkOptions::new())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        entries,
        vec![
            entry(".", &["plain", "sub"], &["keep.txt"]),
            entry("plain", &[], &["a"]),
        ]
    );

    let mut failures = Vec::new();
    let dirs: Vec<String> = view
        .walk(
            &PathKey::root(),
            WalkOptions::new().on_error(|e| {
                failures.push(e);
                Ok(())
            }),
        )
        .map(|entry| entry.unwrap().dir.to_string())
        .collect();
    assert_eq!(dirs, vec![".", "plain"]);
    assert_eq!(failures.len(), 1);
    assert!(matches!(&failures[0], FsError::Subrepo { path, .. } if *path == repo.path("sub")));

    let results: Vec<_> = view.walk(&PathKey::root(), WalkOptions::new().strict()).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(FsError::Subrepo { .. })));
}
