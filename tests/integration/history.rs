//! Integration tests for views pinned to a committed revision

use super::test_utils::{key, names, open_at, TestRepo};
use cask::error::FsError;
use cask::fs::FileSystemView;
use cask::repo::OpenOptions;
use cask::scm::SnapshotScm;
use cask::stage;
use cask::tree::hasher::Algorithm;
use cask::types::Layer;
use cask::{DirtyState, PathKey};
use std::io::Read;
use std::sync::Arc;

fn read_all(view: &dyn FileSystemView, path: &str) -> String {
    let mut reader = view.open(&key(path)).unwrap();
    let mut text = String::new();
    reader.read_to_string(&mut text).unwrap();
    text
}

/// Repository with `foo` and `dir` tracked and captured as `v1`, then `foo`
/// changed and re-tracked in the workspace.
fn repo_with_history() -> (TestRepo, Arc<SnapshotScm>) {
    let repo = TestRepo::new();
    repo.write("foo", "foo");
    repo.write_dir_fixture("dir");
    repo.track("foo");
    repo.track("dir");

    let scm = Arc::new(SnapshotScm::new(&repo.root));
    scm.capture("v1").unwrap();

    repo.write("foo", "something");
    repo.track("foo");
    (repo, scm)
}

#[test]
fn test_pinned_view_reads_committed_records() {
    let (repo, scm) = repo_with_history();
    let view = open_at(&repo.root, OpenOptions::new().scm(scm).rev("v1"), false);

    let info = view.info(&key("foo")).unwrap();
    assert_eq!(info.layer, Layer::Tracked);
    assert_eq!(info.hash.unwrap().digest, "acbd18db4cc2f85cedef654fccc4a4d8");
    assert_eq!(read_all(&view, "foo"), "foo");
    assert_eq!(view.dirty_state(&key("foo")).unwrap(), DirtyState::Clean);

    assert_eq!(
        view.get_hash(&key("dir"), Algorithm::Md5).unwrap().value(),
        "8761c4e9acad696bee718615e23e22db.dir"
    );
    assert_eq!(read_all(&view, "dir/subdir/data"), "data");
}

#[test]
fn test_workspace_view_sees_new_content() {
    let (repo, _scm) = repo_with_history();
    let view = repo.open();
    assert_eq!(
        view.get_hash(&key("foo"), Algorithm::Md5).unwrap().digest,
        "437b930db84b8079c2dd804a71936b5f"
    );
    assert_eq!(view.dirty_state(&key("foo")).unwrap(), DirtyState::Clean);
}

#[test]
fn test_pinned_listing_merges_committed_files() {
    let (repo, scm) = repo_with_history();
    let view = open_at(&repo.root, OpenOptions::new().scm(scm).rev("v1"), false);
    assert_eq!(
        names(view.list_dir(&PathKey::root()).unwrap()),
        vec![".gitignore", "dir", "foo"]
    );
    assert!(!view.exists(&key(".cask")));
}

#[test]
fn test_pinned_view_is_read_only() {
    let (repo, scm) = repo_with_history();
    let view = open_at(&repo.root, OpenOptions::new().scm(scm).rev("v1"), false);
    let err = stage::add(&view, &key("foo"), 1).unwrap_err();
    assert!(matches!(err, FsError::ReadOnly(_)));
}

#[test]
fn test_head_resolves_to_latest_revision() {
    let (repo, scm) = repo_with_history();
    scm.capture("v2").unwrap();
    assert_eq!(scm.revisions(), vec!["v1", "v2"]);

    let view = open_at(&repo.root, OpenOptions::new().scm(scm).rev("HEAD"), false);
    assert_eq!(
        view.get_hash(&key("foo"), Algorithm::Md5).unwrap().digest,
        "437b930db84b8079c2dd804a71936b5f"
    );
}

#[test]
fn test_unknown_revision_rejected() {
    let (repo, scm) = repo_with_history();
    let result = cask::repo::RepoContext::open_with(&repo.root, OpenOptions::new().scm(scm).rev("v9"));
    assert!(matches!(result, Err(FsError::Scm(_))));
}
