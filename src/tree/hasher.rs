//! Content digests for files and directory manifests
//!
//! File digests are the hex digest of the raw bytes. A directory digest is
//! the digest of its manifest serialized as a JSON array of
//! `{"<algorithm>": "<digest>", "relpath": "<posix path>"}` objects with
//! sorted keys, `", "`/`": "` separators and ASCII-only escaping. The byte
//! layout is fixed: records written by other tools must keep matching.

use crate::error::StorageError;
use crate::tree::node::{HashRecord, Manifest, ManifestEntry};
use crate::tree::path::PathKey;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::Arc;

/// Read buffer used when streaming content through a hasher
pub const CHUNK_SIZE: usize = 64 * 1024;

const RELPATH_KEY: &str = "relpath";

/// Supported content-hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Md5,
    Blake3,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Md5
    }
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex digest
    pub fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Blake3 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Algorithm::Md5),
            "blake3" => Ok(Algorithm::Blake3),
            other => Err(StorageError::Codec(format!("unknown hash algorithm: {}", other))),
        }
    }
}

/// Incremental hasher over either supported algorithm
pub enum StreamHasher {
    Md5(Md5),
    Blake3(Box<blake3::Hasher>),
}

impl StreamHasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => StreamHasher::Md5(Md5::new()),
            Algorithm::Blake3 => StreamHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamHasher::Md5(h) => h.update(bytes),
            StreamHasher::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    /// Lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            StreamHasher::Md5(h) => hex::encode(h.finalize()),
            StreamHasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Digest a byte slice
pub fn hash_bytes(algorithm: Algorithm, bytes: &[u8]) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Stream a reader through the hasher, returning the digest and byte count.
pub fn hash_reader<R: Read + ?Sized>(
    algorithm: Algorithm,
    reader: &mut R,
) -> io::Result<(String, u64)> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hasher.finalize_hex(), size))
}

/// Validate that `digest` looks like a hex digest of `algorithm`.
pub fn is_valid_digest(algorithm: Algorithm, digest: &str) -> bool {
    digest.len() == algorithm.hex_len()
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// JSON formatter producing `", "` and `": "` separators with every non-ASCII
/// character (and DEL) escaped as lowercase `\uXXXX` UTF-16 units.
struct AsciiJsonFormatter;

impl serde_json::ser::Formatter for AsciiJsonFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() && ch != '\u{7f}' {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Canonical manifest bytes hashed to produce a directory digest
pub fn manifest_bytes(algorithm: Algorithm, manifest: &Manifest) -> Result<Vec<u8>, StorageError> {
    let rows: Vec<BTreeMap<&str, String>> = manifest
        .entries()
        .iter()
        .map(|entry| {
            let mut row = BTreeMap::new();
            row.insert(algorithm.name(), entry.hash.digest.clone());
            row.insert(RELPATH_KEY, entry.path.as_posix());
            row
        })
        .collect();

    let mut out = Vec::with_capacity(rows.len() * 64 + 2);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, AsciiJsonFormatter);
    rows.serialize(&mut serializer)
        .map_err(|e| StorageError::Codec(format!("failed to serialize manifest: {}", e)))?;
    Ok(out)
}

/// Digest a manifest into a directory record carrying that manifest.
pub fn digest_manifest(algorithm: Algorithm, manifest: Manifest) -> Result<HashRecord, StorageError> {
    let bytes = manifest_bytes(algorithm, &manifest)?;
    let digest = hash_bytes(algorithm, &bytes);
    Ok(HashRecord::directory(algorithm, digest, Arc::new(manifest)))
}

/// Parse canonical manifest bytes back into a manifest.
pub fn parse_manifest(algorithm: Algorithm, bytes: &[u8]) -> Result<Manifest, StorageError> {
    let rows: Vec<BTreeMap<String, String>> = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Codec(format!("malformed manifest: {}", e)))?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let digest = row.get(algorithm.name()).ok_or_else(|| {
            StorageError::Codec(format!("manifest row without {} digest", algorithm))
        })?;
        let relpath = row
            .get(RELPATH_KEY)
            .ok_or_else(|| StorageError::Codec("manifest row without relpath".to_string()))?;
        let path = PathKey::parse(relpath)
            .map_err(|e| StorageError::Codec(format!("bad manifest path {:?}: {}", relpath, e)))?;
        if !is_valid_digest(algorithm, digest) {
            return Err(StorageError::InvalidObjectId(digest.clone()));
        }
        entries.push(ManifestEntry {
            path,
            hash: HashRecord::file(algorithm, digest.clone()),
        });
    }
    Manifest::from_entries(entries)
}
