//! Repository-relative path keys and root canonicalization
//!
//! Every view in the crate addresses entries by a [`PathKey`]: a sequence of
//! segments relative to a repository root. Segments keep the exact bytes the
//! filesystem reports, so a key always maps back to the same file. Keys compare
//! segment-wise, so `a/b` sorts before `a-c` even though `-` < `/` in byte
//! order. Manifest ordering is string-based and lives in `tree::node`.

use crate::error::FsError;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Normalized path relative to a repository root. The empty key is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    segments: Vec<String>,
}

impl PathKey {
    pub fn root() -> Self {
        PathKey::default()
    }

    /// Parse a relative path string, accepting both `/` and `\` separators.
    ///
    /// Empty and `.` segments are dropped; `..` pops a segment and fails when
    /// it would escape the root.
    pub fn parse(raw: &str) -> Result<Self, FsError> {
        let mut key = PathKey::root();
        for segment in raw.split(['/', '\\']) {
            key.push_segment(segment, raw)?;
        }
        Ok(key)
    }

    /// Build a key from a relative filesystem path.
    pub fn from_relative_path(path: &Path) -> Result<Self, FsError> {
        let mut key = PathKey::root();
        for component in path.components() {
            match component {
                Component::Normal(os) => {
                    let segment = os.to_str().ok_or_else(|| {
                        FsError::InvalidPath(format!("non UTF-8 path: {}", path.display()))
                    })?;
                    for part in segment.split('\\') {
                        key.push_segment(part, segment)?;
                    }
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if key.segments.pop().is_none() {
                        return Err(FsError::InvalidPath(format!(
                            "path escapes the repository root: {}",
                            path.display()
                        )));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(FsError::InvalidPath(format!(
                        "expected a relative path: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(key)
    }

    /// Key of `path` under `root`. Relative paths are taken as already
    /// relative to `root`.
    pub fn from_path(root: &Path, path: &Path) -> Result<Self, FsError> {
        if path.is_relative() {
            return Self::from_relative_path(path);
        }
        let relative = path.strip_prefix(root).map_err(|_| {
            FsError::InvalidPath(format!(
                "{} is outside of {}",
                path.display(),
                root.display()
            ))
        })?;
        Self::from_relative_path(relative)
    }

    fn push_segment(&mut self, segment: &str, raw: &str) -> Result<(), FsError> {
        match segment {
            "" | "." => Ok(()),
            ".." => {
                if self.segments.pop().is_none() {
                    return Err(FsError::InvalidPath(format!(
                        "path escapes the repository root: {}",
                        raw
                    )));
                }
                Ok(())
            }
            other => {
                if other.contains('\0') {
                    return Err(FsError::InvalidPath(format!("NUL byte in path: {:?}", raw)));
                }
                self.segments.push(other.to_string());
                Ok(())
            }
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Final segment, `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<PathKey> {
        if self.is_root() {
            return None;
        }
        Some(PathKey {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single listing name. Names come from directory listings and
    /// are trusted to be one segment.
    pub fn child(&self, name: &str) -> PathKey {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        PathKey { segments }
    }

    /// Append a relative path that may contain separators.
    pub fn join(&self, relative: &str) -> Result<PathKey, FsError> {
        Ok(self.concat(&PathKey::parse(relative)?))
    }

    pub fn concat(&self, other: &PathKey) -> PathKey {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        PathKey { segments }
    }

    /// True when `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &PathKey) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    pub fn relative_to(&self, ancestor: &PathKey) -> Option<PathKey> {
        if !self.starts_with(ancestor) {
            return None;
        }
        Some(PathKey {
            segments: self.segments[ancestor.segments.len()..].to_vec(),
        })
    }

    /// Non-root prefixes from the shallowest to `self` inclusive.
    pub fn prefixes(&self) -> impl Iterator<Item = PathKey> + '_ {
        (1..=self.segments.len()).map(move |len| PathKey {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// Slash-joined form; the root renders as the empty string.
    pub fn as_posix(&self) -> String {
        self.segments.join("/")
    }

    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.as_posix())
        }
    }
}

impl FromStr for PathKey {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PathKey::parse(s)
    }
}

/// Canonicalize a repository root.
///
/// Resolves symlinks and `..` through `dunce` so Windows roots stay free of
/// `\\?\` prefixes. Paths that do not exist yet are made absolute instead.
pub fn canonicalize_root(path: &Path) -> Result<PathBuf, FsError> {
    if path.exists() {
        return dunce::canonicalize(path).map_err(|e| FsError::io(path, e));
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| FsError::io(path, e))?;
    Ok(cwd.join(path))
}
