//! Ignore rules for working-directory listings and `.gitignore` files.
//!
//! `.caskignore` at a repository root hides paths from the working layer.
//! `.git`, `.hg` and the `.cask` marker directory are always hidden. The same
//! pattern matcher reads `.gitignore` files for the workspace SCM backend.
//!
//! Supported syntax is a practical subset of gitignore: `#` comments, a
//! leading `/` (or any inner `/`) anchors the pattern to the directory holding
//! the ignore file, a trailing `/` is accepted and dropped, and `*`, `?`,
//! `[...]` globs never cross `/`. Negation (`!`) lines are skipped.

use crate::error::FsError;
use crate::tree::path::PathKey;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Directory names hidden from every working-layer listing
pub const BUILTIN_DEFAULTS: &[&str] = &[".git", ".hg", crate::repo::MARKER_DIR];

/// Per-repository ignore file
pub const IGNORE_FILE: &str = ".caskignore";

pub const GITIGNORE_FILE: &str = ".gitignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    anchored: bool,
}

/// Compiled ignore patterns relative to one directory
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
    builtin: bool,
}

impl IgnoreRules {
    /// Only the built-in names
    pub fn builtin() -> Self {
        IgnoreRules {
            rules: Vec::new(),
            builtin: true,
        }
    }

    /// Parse ignore-file text. Unparseable globs are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let line = line.trim_end_matches('/');
            let anchored = line.contains('/');
            let body = line.trim_start_matches('/');
            if body.is_empty() {
                continue;
            }
            match Pattern::new(body) {
                Ok(pattern) => rules.push(Rule { pattern, anchored }),
                Err(e) => warn!(pattern = %line, error = %e, "Skipping invalid ignore pattern"),
            }
        }
        IgnoreRules {
            rules,
            builtin: false,
        }
    }

    /// Built-in names plus `.caskignore` at `root`, if present.
    pub fn load(root: &Path) -> Result<Self, FsError> {
        let path = root.join(IGNORE_FILE);
        let mut rules = match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(FsError::io(path, e)),
        };
        rules.builtin = true;
        Ok(rules)
    }

    /// Built-in names plus the given ignore-file text
    pub fn with_builtin(text: &str) -> Self {
        let mut rules = Self::parse(text);
        rules.builtin = true;
        rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && !self.builtin
    }

    /// True when `path` (relative to the rules' directory) or any of its
    /// ancestors is ignored.
    pub fn is_ignored(&self, path: &PathKey) -> bool {
        if self.builtin
            && path
                .segments()
                .iter()
                .any(|s| BUILTIN_DEFAULTS.contains(&s.as_str()))
        {
            return true;
        }
        self.rules.iter().any(|rule| {
            if rule.anchored {
                path.prefixes()
                    .any(|prefix| rule.pattern.matches_with(&prefix.as_posix(), MATCH_OPTIONS))
            } else {
                path.segments()
                    .iter()
                    .any(|segment| rule.pattern.matches_with(segment, MATCH_OPTIONS))
            }
        })
    }
}

/// Read `.gitignore` in `dir` into pattern lines (trimmed, no blanks or comments).
pub fn read_gitignore_patterns(dir: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(dir.join(GITIGNORE_FILE)) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// True when any `.gitignore` between `root` and the parent of `path`
/// ignores it.
pub fn is_git_ignored(root: &Path, path: &PathKey) -> bool {
    let mut dir = PathKey::root();
    for segment in path.segments() {
        let text = match fs::read_to_string(dir.to_path(root).join(GITIGNORE_FILE)) {
            Ok(text) => text,
            Err(_) => {
                dir = dir.child(segment);
                continue;
            }
        };
        if let Some(relative) = path.relative_to(&dir) {
            if IgnoreRules::parse(&text).is_ignored(&relative) {
                return true;
            }
        }
        dir = dir.child(segment);
    }
    false
}

/// Append `/<name>` to the `.gitignore` in `dir` unless already listed.
pub fn append_gitignore_entry(dir: &Path, name: &str) -> Result<bool, FsError> {
    let entry = format!("/{}", name);
    if read_gitignore_patterns(dir).iter().any(|line| *line == entry) {
        return Ok(false);
    }

    let path = dir.join(GITIGNORE_FILE);
    let needs_newline = match fs::read(&path) {
        Ok(bytes) => !bytes.is_empty() && !bytes.ends_with(b"\n"),
        Err(_) => false,
    };
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| FsError::io(&path, e))?;
    if needs_newline {
        file.write_all(b"\n").map_err(|e| FsError::io(&path, e))?;
    }
    writeln!(file, "{}", entry).map_err(|e| FsError::io(&path, e))?;
    Ok(true)
}
