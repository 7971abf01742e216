//! Property-based tests for digest determinism

use cask::fs::WorkspaceFs;
use cask::ignore::IgnoreRules;
use cask::store::codec;
use cask::tree::engine::HashEngine;
use cask::tree::hasher::{self, Algorithm};
use cask::tree::node::{HashRecord, Manifest, ManifestEntry};
use cask::PathKey;
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Relative file paths over a tiny alphabet, so prefixes collide often
fn file_tree() -> impl Strategy<Value = Vec<(Vec<String>, Vec<u8>)>> {
    prop::collection::vec(
        (
            prop::collection::vec("[a-c]{1,2}", 1..4),
            prop::collection::vec(any::<u8>(), 0..32),
        ),
        0..12,
    )
}

/// Drop paths that are equal to, inside or above an earlier path.
fn without_conflicts(files: Vec<(Vec<String>, Vec<u8>)>) -> Vec<(PathKey, Vec<u8>)> {
    let mut kept: Vec<(PathKey, Vec<u8>)> = Vec::new();
    for (segments, content) in files {
        let path = PathKey::parse(&segments.join("/")).unwrap();
        if kept
            .iter()
            .any(|(other, _)| path.starts_with(other) || other.starts_with(&path))
        {
            continue;
        }
        kept.push((path, content));
    }
    kept
}

fn write_tree<'a>(root: &Path, files: impl Iterator<Item = &'a (PathKey, Vec<u8>)>) {
    for (path, content) in files {
        let location = path.to_path(root);
        fs::create_dir_all(location.parent().unwrap()).unwrap();
        fs::write(location, content).unwrap();
    }
}

fn digest_of(root: &Path) -> HashRecord {
    let view = WorkspaceFs::new(root, IgnoreRules::builtin());
    HashEngine::in_memory()
        .get_hash(&view, &PathKey::root(), Algorithm::Md5)
        .unwrap()
}

/// Directory digests depend on contents only, not on creation order
#[test]
fn test_directory_digest_ignores_creation_order() {
    let mut runner = proptest::test_runner::TestRunner::new(ProptestConfig::with_cases(32));

    runner
        .run(&file_tree(), |files| {
            let files = without_conflicts(files);
            let forward = TempDir::new().unwrap();
            let backward = TempDir::new().unwrap();
            write_tree(forward.path(), files.iter());
            write_tree(backward.path(), files.iter().rev());

            let first = digest_of(forward.path());
            let second = digest_of(backward.path());
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.file_count, Some(files.len() as u64));

            let manifest = Manifest::from_entries(
                files
                    .iter()
                    .map(|(path, content)| ManifestEntry {
                        path: path.clone(),
                        hash: HashRecord::file(Algorithm::Md5, hasher::hash_bytes(Algorithm::Md5, content)),
                    })
                    .collect(),
            )
            .unwrap();
            let expected = hasher::digest_manifest(Algorithm::Md5, manifest).unwrap();
            prop_assert_eq!(first.digest, expected.digest);
            Ok(())
        })
        .unwrap();
}

/// Manifest leaves with unique, non-overlapping paths
fn manifest_leaves() -> impl Strategy<Value = Vec<ManifestEntry>> {
    prop::collection::vec(
        (
            prop::collection::vec("[a-c]{1,2}", 1..4),
            "[0-9a-f]{32}",
            prop::option::of(0u64..1 << 40),
        ),
        0..16,
    )
    .prop_map(|leaves| {
        let mut kept: Vec<ManifestEntry> = Vec::new();
        for (segments, digest, size) in leaves {
            let path = PathKey::parse(&segments.join("/")).unwrap();
            if kept
                .iter()
                .any(|other| path.starts_with(&other.path) || other.path.starts_with(&path))
            {
                continue;
            }
            let mut hash = HashRecord::file(Algorithm::Md5, digest);
            hash.size = size;
            kept.push(ManifestEntry { path, hash });
        }
        kept
    })
}

/// Encoded records decode to the same identity and counts
#[test]
fn test_record_codec_preserves_identity() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &("[0-9a-f]{32}", any::<bool>(), prop::option::of(0u64..1 << 40)),
            |(digest, is_dir, size)| {
                let mut record = if is_dir {
                    HashRecord::directory_ref(Algorithm::Md5, digest)
                } else {
                    HashRecord::file(Algorithm::Md5, digest)
                };
                record.size = size;

                let decoded = codec::decode_record(&codec::encode_record(&record).unwrap()).unwrap();
                prop_assert_eq!(decoded.value(), record.value());
                prop_assert_eq!(decoded.size, record.size);
                prop_assert_eq!(decoded.kind, record.kind);
                prop_assert!(decoded.manifest.is_none());
                Ok(())
            },
        )
        .unwrap();
}

/// Directory records keep every manifest leaf and their counts through the codec
#[test]
fn test_record_codec_preserves_manifest() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&manifest_leaves(), |leaves| {
            let manifest = Manifest::from_entries(leaves).unwrap();
            let record = hasher::digest_manifest(Algorithm::Md5, manifest).unwrap();
            let expected = record.manifest.clone().unwrap();

            let decoded = codec::decode_record(&codec::encode_record(&record).unwrap()).unwrap();
            prop_assert_eq!(decoded.value(), record.value());
            prop_assert_eq!(decoded.file_count, Some(expected.len() as u64));
            prop_assert_eq!(decoded.size, record.size);

            let manifest = decoded.manifest.unwrap();
            prop_assert_eq!(manifest.len(), expected.len());
            for (got, want) in manifest.entries().iter().zip(expected.entries()) {
                prop_assert_eq!(&got.path, &want.path);
                prop_assert_eq!(got.hash.value(), want.hash.value());
                prop_assert_eq!(got.hash.size, want.hash.size);
            }
            Ok(())
        })
        .unwrap();
}

/// Keys do not depend on the separator used to write them
#[test]
fn test_path_key_separator_independence() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&prop::collection::vec("[a-z0-9_.-]{1,8}", 1..6), |segments| {
            prop_assume!(segments.iter().all(|s| s != "." && s != ".."));
            let forward = PathKey::parse(&segments.join("/"));
            let backward = PathKey::parse(&segments.join("\\"));
            let forward = forward.unwrap();
            prop_assert_eq!(&forward, &backward.unwrap());
            prop_assert_eq!(forward.depth(), segments.len());
            prop_assert_eq!(forward.as_posix(), segments.join("/"));
            Ok(())
        })
        .unwrap();
}
