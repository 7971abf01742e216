//! Integration tests for layered configuration

use super::test_utils::{with_env, TestRepo};
use cask::config::{ConfigLoader, CONFIG_FILE, LOCAL_CONFIG_FILE};
use cask::repo::{RepoContext, MARKER_DIR};
use cask::tree::hasher::Algorithm;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_global_file_below_repository_file() {
    let repo = TestRepo::new();
    let home = TempDir::new().unwrap();
    let global_dir = home.path().join("cask");
    fs::create_dir_all(&global_dir).unwrap();
    fs::write(
        global_dir.join(CONFIG_FILE),
        "[core]\njobs = 5\n\n[cache]\ntypes = [\"hardlink\", \"copy\"]\n",
    )
    .unwrap();
    fs::write(
        repo.path(".cask/config.toml"),
        "[core]\nstate = false\n\n[cache]\ntypes = [\"symlink\"]\n",
    )
    .unwrap();

    let config = with_env(
        &[("XDG_CONFIG_HOME", home.path().to_str().unwrap())],
        || ConfigLoader::load(&repo.root).unwrap(),
    );
    assert_eq!(config.core.jobs, Some(5));
    assert_eq!(config.cache.types, vec!["symlink"]);
    assert!(!config.core.state);
}

#[test]
fn test_environment_overrides_files() {
    let repo = TestRepo::new();
    fs::write(
        repo.root.join(MARKER_DIR).join(LOCAL_CONFIG_FILE),
        "[core]\njobs = 2\n",
    )
    .unwrap();

    let config = with_env(&[("CASK__CORE__JOBS", "3")], || {
        ConfigLoader::load(&repo.root).unwrap()
    });
    assert_eq!(config.core.jobs(), 3);

    let without_env = ConfigLoader::load(&repo.root).unwrap();
    assert_eq!(without_env.core.jobs(), 2);
}

#[test]
fn test_context_uses_configured_algorithm_and_cache() {
    let repo = TestRepo::new();
    let cache = TempDir::new().unwrap();
    fs::write(
        repo.path(".cask/config.toml"),
        format!(
            "[core]\nstate = false\nalgorithm = \"blake3\"\n\n[cache]\ndir = {:?}\n",
            cache.path().to_str().unwrap()
        ),
    )
    .unwrap();

    let context = RepoContext::open(&repo.root).unwrap();
    assert_eq!(context.config().core.algorithm, Algorithm::Blake3);
    assert_eq!(context.cache_dir(), cache.path());
    assert_eq!(context.store().algorithm(), Algorithm::Blake3);
}

#[test]
fn test_invalid_values_rejected() {
    let repo = TestRepo::new();
    fs::write(
        repo.path(".cask/config.toml"),
        "[cache]\ntypes = [\"teleport\"]\n",
    )
    .unwrap();
    let err = RepoContext::open(&repo.root).unwrap_err();
    assert!(err.to_string().contains("teleport"));
}

#[test]
fn test_load_from_file_ignores_other_sources() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("custom.toml");
    fs::write(&path, "[core]\nsubrepos = true\n").unwrap();

    let config = with_env(&[("CASK__CORE__SUBREPOS", "false")], || {
        ConfigLoader::load_from_file(&path).unwrap()
    });
    assert!(config.core.subrepos);
    assert!(config.core.state);
}
