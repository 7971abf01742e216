//! Integration tests for content hashing through the repository view

use super::test_utils::{key, names, TestRepo};
use cask::fs::FileSystemView;
use cask::stage;
use cask::tree::hasher::{self, Algorithm};
use cask::PathKey;
use std::io::Read;

#[test]
fn test_get_hash_tracked_directory() {
    let repo = TestRepo::new();
    repo.write_dir_fixture("dir");
    repo.track("dir");

    let view = repo.open();
    let record = view.get_hash(&key("dir"), Algorithm::Md5).unwrap();
    assert_eq!(record.value(), "8761c4e9acad696bee718615e23e22db.dir");
    assert_eq!(record.file_count, Some(3));

    let subdir = view.get_hash(&key("dir/subdir"), Algorithm::Md5).unwrap();
    assert_eq!(subdir.value(), "af314506f1622d107e0ed3f14ec1a3b5.dir");
    assert_eq!(subdir.file_count, Some(1));
}

/// An untracked file added to a tracked directory changes its digest
#[test]
fn test_get_hash_directory_with_untracked_addition() {
    let repo = TestRepo::new();
    repo.write_dir_fixture("dir");
    repo.track("dir");
    repo.write("dir/baz", "baz");

    let view = repo.open();
    let record = view.get_hash(&key("dir"), Algorithm::Md5).unwrap();
    assert_eq!(record.value(), "05f70171c2ccb0517c3571f4f948c20f.dir");
    assert_eq!(record.file_count, Some(4));
}

#[test]
fn test_get_hash_plain_directories() {
    let repo = TestRepo::new();
    repo.write("dirty/foo", "foo");
    repo.write("dirty/bar", "bar");
    repo.write("mixed/.gitignore", "/foo\n");
    repo.write("mixed/foo", "foo");
    repo.write("mixed/bar", "bar");
    repo.mkdir("empty");

    let view = repo.open();
    assert_eq!(
        view.get_hash(&key("dirty"), Algorithm::Md5).unwrap().value(),
        "5ea40360f5b4ec688df672a4db9c17d1.dir"
    );
    assert_eq!(
        view.get_hash(&key("mixed"), Algorithm::Md5).unwrap().value(),
        "e1d9e8eae5374860ae025ec84cfd85c7.dir"
    );
    let empty = view.get_hash(&key("empty"), Algorithm::Md5).unwrap();
    assert_eq!(empty.value(), "d751713988987e9331980363e24189ce.dir");
    assert_eq!(empty.file_count, Some(0));
}

/// With the working copy gone, the recorded value comes back even when the
/// cache no longer holds the content.
#[test]
fn test_clean_short_circuit_reads_no_content() {
    let repo = TestRepo::new();
    repo.write("foo", "foo");
    let recorded = repo.track("foo");
    repo.remove("foo");
    std::fs::remove_dir_all(repo.path(".cask/cache")).unwrap();

    let view = repo.open();
    let record = view.get_hash(&key("foo"), Algorithm::Md5).unwrap();
    assert_eq!(record, recorded);
    assert_eq!(record.digest, "acbd18db4cc2f85cedef654fccc4a4d8");
}

#[test]
fn test_get_hash_missing_path() {
    let repo = TestRepo::new();
    let view = repo.open();
    let err = view.get_hash(&key("nope"), Algorithm::Md5).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_blake3_ignores_md5_records() {
    let repo = TestRepo::new();
    repo.write("foo", "foo");
    repo.track("foo");

    let view = repo.open();
    let record = view.get_hash(&key("foo"), Algorithm::Blake3).unwrap();
    assert_eq!(record.algorithm, Algorithm::Blake3);
    assert_eq!(record.digest, hasher::hash_bytes(Algorithm::Blake3, b"foo"));
}

#[test]
fn test_hash_many_matches_single_hashes() {
    let repo = TestRepo::new();
    repo.write_dir_fixture("dir");
    repo.write("foo", "foo");

    let view = repo.open();
    let paths = vec![key("dir"), key("foo"), key("dir/subdir"), PathKey::root()];
    let results = stage::hash_many(view.engine(), &view, &paths, Algorithm::Md5, 3);
    for (path, result) in paths.iter().zip(results) {
        let expected = view.get_hash(path, Algorithm::Md5).unwrap();
        assert_eq!(result.unwrap(), expected, "digest of {}", path);
    }
}

#[test]
fn test_memo_survives_repeated_queries() {
    let repo = TestRepo::new();
    repo.write_dir_fixture("dir");

    let view = repo.open();
    let first = view.get_hash(&key("dir"), Algorithm::Md5).unwrap();
    let memoized = view.engine().memo_len();
    assert_eq!(memoized, 3);
    let second = view.get_hash(&key("dir"), Algorithm::Md5).unwrap();
    assert_eq!(first, second);
    assert_eq!(view.engine().memo_len(), memoized);

    view.reset();
    assert_eq!(view.engine().memo_len(), 0);
}

/// Decomposed names are read and tracked under their on-disk spelling
#[test]
fn test_decomposed_unicode_names() {
    let name = "cafe\u{0301}";
    let repo = TestRepo::new();
    repo.write(&format!("dir/{}", name), "foo");

    let view = repo.open();
    assert_eq!(names(view.list_dir(&key("dir")).unwrap()), vec![name]);
    let path = key("dir").child(name);
    assert_eq!(view.info(&path).unwrap().size, Some(3));

    let mut text = String::new();
    view.open(&path).unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "foo");

    let record = view.get_hash(&key("dir"), Algorithm::Md5).unwrap();
    assert_eq!(record.file_count, Some(1));
    let manifest = record.manifest.unwrap();
    assert_eq!(manifest.entries()[0].path.as_posix(), name);
    assert_eq!(manifest.entries()[0].hash.digest, "acbd18db4cc2f85cedef654fccc4a4d8");

    repo.track("dir");
    let view = repo.open();
    let mut tracked = String::new();
    view.tracked().open(&path).unwrap().read_to_string(&mut tracked).unwrap();
    assert_eq!(tracked, "foo");
}
