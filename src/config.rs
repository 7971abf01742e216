//! Configuration System
//!
//! Layered repository configuration, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. Global file: `<config dir>/cask/config.toml`
//! 3. Repository file: `<root>/.cask/config.toml`
//! 4. Local overrides: `<root>/.cask/config.local.toml`
//! 5. Environment: `CASK__<SECTION>__<KEY>` (e.g. `CASK__CORE__SUBREPOS=true`)

use crate::error::FsError;
use crate::logging::LoggingConfig;
use crate::repo::MARKER_DIR;
use crate::tree::hasher::Algorithm;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.toml";
pub const LOCAL_CONFIG_FILE: &str = "config.local.toml";

/// Link strategies accepted in `cache.types`
pub const CACHE_TYPES: &[&str] = &["reflink", "hardlink", "symlink", "copy"];

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaskConfig {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[core]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Descend into nested repositories
    #[serde(default)]
    pub subrepos: bool,

    /// Persist file digests between runs
    #[serde(default = "default_true")]
    pub state: bool,

    /// Content hash algorithm for new records
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Worker threads for bulk hashing and saving; defaults to the CPU count
    #[serde(default)]
    pub jobs: Option<usize>,
}

/// `[cache]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Object store location; relative paths resolve against the repository
    /// root. Defaults to `.cask/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Ordered link strategies for checkouts
    #[serde(default = "default_cache_types")]
    pub types: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_cache_types() -> Vec<String> {
    vec!["reflink".to_string(), "copy".to_string()]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            subrepos: false,
            state: true,
            algorithm: Algorithm::default(),
            jobs: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            types: default_cache_types(),
        }
    }
}

impl CoreConfig {
    /// Effective worker count
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

impl CaskConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), FsError> {
        let mut errors = Vec::new();

        if self.core.jobs == Some(0) {
            errors.push("core.jobs must be at least 1".to_string());
        }
        if self.cache.types.is_empty() {
            errors.push("cache.types cannot be empty".to_string());
        }
        for kind in &self.cache.types {
            if !CACHE_TYPES.contains(&kind.as_str()) {
                errors.push(format!(
                    "unknown cache type '{}' (expected one of {})",
                    kind,
                    CACHE_TYPES.join(", ")
                ));
            }
        }
        if let Some(dir) = &self.cache.dir {
            if dir.as_os_str().is_empty() {
                errors.push("cache.dir cannot be empty".to_string());
            }
        }
        if let Err(e) = self.logging.validate() {
            errors.push(format!("logging: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FsError::Config(errors.join("; ")))
        }
    }

    /// Absolute object store location for a repository rooted at `root`
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        match &self.cache.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => root.join(MARKER_DIR).join("cache"),
        }
    }
}

/// Loads [`CaskConfig`] from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Global configuration file, when a home directory is known
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cask").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load the configuration of the repository at `root`.
    pub fn load(root: &Path) -> Result<CaskConfig, FsError> {
        let marker = root.join(MARKER_DIR);
        let mut builder = Config::builder();
        if let Some(global) = Self::global_config_path() {
            builder = builder.add_source(File::from(global).required(false));
        }
        builder = builder
            .add_source(File::from(marker.join(CONFIG_FILE)).required(false))
            .add_source(File::from(marker.join(LOCAL_CONFIG_FILE)).required(false))
            .add_source(
                Environment::with_prefix("CASK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: CaskConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(root = %root.display(), ?config.core, "Configuration loaded");
        Ok(config)
    }

    /// Load a single file, ignoring every other source.
    pub fn load_from_file(path: &Path) -> Result<CaskConfig, FsError> {
        let config: CaskConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
