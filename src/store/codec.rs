//! Metafile and hash-record codecs
//!
//! A metafile `<name>.cask` is YAML:
//!
//! ```yaml
//! outs:
//! - md5: 8761c4e9acad696bee718615e23e22db.dir
//!   size: 12
//!   nfiles: 3
//!   path: dir
//! ```
//!
//! `path` is relative to the directory holding the metafile. An out without
//! a digest is declared but has no recorded content yet.
//!
//! Hash records also have a self-contained JSON form that embeds the
//! directory manifest, for callers that persist records outside the cache.

use crate::error::StorageError;
use crate::tree::hasher::Algorithm;
use crate::tree::node::{HashRecord, Manifest, ManifestEntry};
use crate::tree::path::PathKey;
use crate::types::EntryKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Suffix of metafiles
pub const METAFILE_SUFFIX: &str = ".cask";

/// True for `<name>.cask` files and `.caskignore`
pub fn is_metadata_name(name: &str) -> bool {
    name == crate::ignore::IGNORE_FILE
        || (name.len() > METAFILE_SUFFIX.len() && name.ends_with(METAFILE_SUFFIX))
}

/// Parsed metafile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    #[serde(default)]
    pub outs: Vec<OutRecord>,
}

/// One declared output of a metafile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfiles: Option<u64>,
    pub path: String,
}

impl OutRecord {
    /// Declared out with no recorded content
    pub fn declared(path: impl Into<String>) -> Self {
        OutRecord {
            md5: None,
            blake3: None,
            size: None,
            nfiles: None,
            path: path.into(),
        }
    }

    pub fn from_record(path: impl Into<String>, record: &HashRecord) -> Self {
        let mut out = OutRecord::declared(path);
        match record.algorithm {
            Algorithm::Md5 => out.md5 = Some(record.value()),
            Algorithm::Blake3 => out.blake3 = Some(record.value()),
        }
        out.size = record.size;
        if record.is_dir() {
            out.nfiles = record.file_count;
        }
        out
    }

    /// Recorded hash, if any. `md5` wins when both are present.
    pub fn hash_record(&self) -> Result<Option<HashRecord>, StorageError> {
        let (algorithm, value) = match (&self.md5, &self.blake3) {
            (Some(value), _) => (Algorithm::Md5, value),
            (None, Some(value)) => (Algorithm::Blake3, value),
            (None, None) => return Ok(None),
        };
        let mut record = HashRecord::from_value(algorithm, value)?;
        record.size = self.size;
        if record.is_dir() {
            record.file_count = self.nfiles;
        }
        Ok(Some(record))
    }
}

pub fn parse_metafile(bytes: &[u8]) -> Result<MetaFile, StorageError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(MetaFile::default());
    }
    serde_yaml::from_slice(bytes)
        .map_err(|e| StorageError::Codec(format!("malformed metafile: {}", e)))
}

pub fn render_metafile(meta: &MetaFile) -> Result<String, StorageError> {
    serde_yaml::to_string(meta)
        .map_err(|e| StorageError::Codec(format!("failed to render metafile: {}", e)))
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordRepr {
    algorithm: Algorithm,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nfiles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<EntryRepr>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRepr {
    relpath: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

/// Encode a record, embedding its manifest when loaded.
pub fn encode_record(record: &HashRecord) -> Result<Vec<u8>, StorageError> {
    let entries = record.manifest.as_ref().map(|manifest| {
        manifest
            .entries()
            .iter()
            .map(|entry| EntryRepr {
                relpath: entry.path.as_posix(),
                value: entry.hash.value(),
                size: entry.hash.size,
            })
            .collect()
    });
    let repr = RecordRepr {
        algorithm: record.algorithm,
        value: record.value(),
        size: record.size,
        nfiles: record.file_count,
        entries,
    };
    serde_json::to_vec(&repr).map_err(|e| StorageError::Codec(format!("failed to encode record: {}", e)))
}

/// Decode a record produced by [`encode_record`].
pub fn decode_record(bytes: &[u8]) -> Result<HashRecord, StorageError> {
    let repr: RecordRepr = serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Codec(format!("malformed record: {}", e)))?;
    let mut record = HashRecord::from_value(repr.algorithm, &repr.value)?;

    if let Some(entries) = repr.entries {
        if record.kind != EntryKind::Directory {
            return Err(StorageError::Codec(format!(
                "file record {} carries a manifest",
                repr.value
            )));
        }
        let mut leaves = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = PathKey::parse(&entry.relpath)
                .map_err(|e| StorageError::Codec(format!("bad manifest path: {}", e)))?;
            let mut hash = HashRecord::from_value(repr.algorithm, &entry.value)?;
            hash.size = entry.size;
            leaves.push(ManifestEntry { path, hash });
        }
        record.manifest = Some(Arc::new(Manifest::from_entries(leaves)?));
    }
    record.size = repr.size;
    record.file_count = repr.nfiles;
    Ok(record)
}
