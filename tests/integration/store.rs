//! Integration tests for the local object store

use super::test_utils::key;
use cask::error::StorageError;
use cask::store::{codec, LocalObjectStore, ObjectSource, ObjectStore};
use cask::tree::hasher::{self, Algorithm};
use cask::tree::node::{HashRecord, Manifest, ManifestEntry};
use std::io::Read;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn store(temp_dir: &TempDir) -> LocalObjectStore {
    LocalObjectStore::new(temp_dir.path().join("cache"), Algorithm::Md5)
}

fn read_object(store: &dyn ObjectStore, oid: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    store.open(oid).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

fn count_objects(root: &std::path::Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.path().components().any(|c| c.as_os_str() == "tmp"))
        .count()
}

#[test]
fn test_file_source_stored_by_digest() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let source = temp_dir.path().join("source");
    std::fs::write(&source, "data").unwrap();

    let record = store.put(ObjectSource::File(&source)).unwrap();
    assert_eq!(record.digest, "8d777f385d3dfec8815d20f7496026dc");
    assert_eq!(record.size, Some(4));
    assert!(store
        .root()
        .join("8d")
        .join("777f385d3dfec8815d20f7496026dc")
        .is_file());
    assert_eq!(read_object(&store, &record.value()), b"data");
}

#[test]
fn test_concurrent_puts_of_identical_content() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(store(&temp_dir));

    thread::scope(|scope| {
        for _ in 0..8 {
            let store = store.clone();
            scope.spawn(move || {
                let record = store.put(ObjectSource::Bytes(b"foo")).unwrap();
                assert_eq!(record.digest, "acbd18db4cc2f85cedef654fccc4a4d8");
            });
        }
    });

    assert_eq!(count_objects(store.root()), 1);
    assert_eq!(read_object(store.as_ref(), "acbd18db4cc2f85cedef654fccc4a4d8"), b"foo");
}

#[test]
fn test_manifest_stored_after_leaves_and_reloaded() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let foo = store.put(ObjectSource::Bytes(b"foo")).unwrap();
    let bar = store.put(ObjectSource::Bytes(b"bar")).unwrap();
    let data = store.put(ObjectSource::Bytes(b"data")).unwrap();

    let manifest = Manifest::from_entries(vec![
        ManifestEntry { path: key("foo"), hash: foo },
        ManifestEntry { path: key("subdir/data"), hash: data },
        ManifestEntry { path: key("bar"), hash: bar },
    ])
    .unwrap();
    let record = store.put(ObjectSource::Manifest(&manifest)).unwrap();
    assert_eq!(record.value(), "8761c4e9acad696bee718615e23e22db.dir");

    let reference = HashRecord::from_value(Algorithm::Md5, &record.value()).unwrap();
    assert!(reference.manifest.is_none());
    let loaded = store.load_manifest(&reference).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(
        loaded.get(&key("subdir/data")).unwrap().digest,
        "8d777f385d3dfec8815d20f7496026dc"
    );
    assert!(store.contains_record(&reference));
}

#[test]
fn test_contains_record_requires_every_leaf() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let foo = store.put(ObjectSource::Bytes(b"foo")).unwrap();
    let bar = store.put(ObjectSource::Bytes(b"bar")).unwrap();
    let manifest = Manifest::from_entries(vec![
        ManifestEntry { path: key("foo"), hash: foo.clone() },
        ManifestEntry { path: key("bar"), hash: bar },
    ])
    .unwrap();
    let record = store.put(ObjectSource::Manifest(&manifest)).unwrap();
    assert_eq!(record.value(), "5ea40360f5b4ec688df672a4db9c17d1.dir");

    std::fs::remove_file(store.object_path(&foo.value()).unwrap()).unwrap();
    assert!(store.contains(&record.value()));
    assert!(!store.contains_record(&record));
}

#[test]
fn test_manifest_with_missing_leaf_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let baz = HashRecord::file(Algorithm::Md5, hasher::hash_bytes(Algorithm::Md5, b"baz"));
    let manifest = Manifest::from_entries(vec![ManifestEntry { path: key("baz"), hash: baz }]).unwrap();

    match store.put(ObjectSource::Manifest(&manifest)) {
        Err(StorageError::ManifestInvariantViolation { missing, .. }) => {
            assert_eq!(missing, "73feffa4b7f6bb68e44cf984c85f6e88");
        }
        other => panic!("expected invariant violation, got {:?}", other.map(|r| r.value())),
    }
    assert_eq!(count_objects(store.root()), 0);
}

#[test]
fn test_hashed_put_rejects_wrong_record() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let claimed = HashRecord::file(Algorithm::Md5, "37b51d194a7513e45b56f6524f2d51f2");

    let result = store.put(ObjectSource::Hashed {
        reader: Box::new(std::io::Cursor::new(b"foo".to_vec())),
        record: &claimed,
    });
    assert!(matches!(result, Err(StorageError::HashMismatch { .. })));
    assert!(!store.contains(&claimed.value()));
    assert!(!store.contains("acbd18db4cc2f85cedef654fccc4a4d8"));
}

#[test]
fn test_missing_object_reported() {
    let temp_dir = TempDir::new().unwrap();
    let store = store(&temp_dir);
    let result = store.open("acbd18db4cc2f85cedef654fccc4a4d8");
    assert!(matches!(result, Err(StorageError::ObjectMissing { .. })));

    let reference = HashRecord::directory_ref(Algorithm::Md5, "5ea40360f5b4ec688df672a4db9c17d1");
    assert!(matches!(
        store.load_manifest(&reference),
        Err(StorageError::ObjectMissing { .. })
    ));
}

#[test]
fn test_record_codec_keeps_directory_contents() {
    let foo = HashRecord::file(Algorithm::Md5, "acbd18db4cc2f85cedef654fccc4a4d8").with_size(3);
    let manifest = Manifest::from_entries(vec![ManifestEntry { path: key("a/foo"), hash: foo }]).unwrap();
    let record = hasher::digest_manifest(Algorithm::Md5, manifest).unwrap();

    let decoded = codec::decode_record(&codec::encode_record(&record).unwrap()).unwrap();
    assert_eq!(decoded, record);
    assert_eq!(decoded.file_count, Some(1));
    assert_eq!(
        decoded.manifest.unwrap().get(&key("a/foo")).unwrap().size,
        Some(3)
    );
}
