//! Repository and plugin path resolution.

use std::path::{Path, PathBuf};

use crate::config::defaults::{ENV_FILE_NAME, LOG_FILE_NAME, REPO_ROOT_MARKERS};
use crate::config::types::{LogSection, PathsSection};

/// Nearest ancestor of `start` (inclusive) that contains a root marker,
/// or `start` itself when none does.
pub fn find_repo_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| REPO_ROOT_MARKERS.iter().any(|m| dir.join(m).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// `.env` location for a repository root.
pub fn env_file(repo_root: &Path) -> PathBuf {
    repo_root.join(ENV_FILE_NAME)
}

/// Every path the dev server touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub repo_root: PathBuf,
    pub plugin_root: PathBuf,
    /// `<plugin>/src`: watched, and the root of every graph key
    pub src_root: PathBuf,
    pub manifest: PathBuf,
    pub dist_dir: PathBuf,
    /// Served under `/__static`
    pub live_dir: PathBuf,
    /// Worker output before it is committed
    pub staging_dir: PathBuf,
    /// Rewritten dev manifest handed to the packager
    pub package_dir: PathBuf,
    pub dev_package: PathBuf,
    /// Release build output; the release manifest is written here too
    pub build_dir: PathBuf,
    pub build_staging_dir: PathBuf,
    pub release_package: PathBuf,
    pub signing_key: PathBuf,
    pub log_file: PathBuf,
}

impl ProjectPaths {
    pub fn resolve(repo_root: &Path, paths: &PathsSection, log: &LogSection) -> Self {
        let plugin_root = paths
            .plugin_root
            .as_deref()
            .map(|p| absolutize(repo_root, p))
            .unwrap_or_else(|| repo_root.join("plugin"));
        let src_root = plugin_root.join("src");
        let manifest = paths
            .manifest
            .as_deref()
            .map(|p| absolutize(repo_root, p))
            .unwrap_or_else(|| src_root.join("manifest.json"));
        let dist_dir = paths
            .dist_dir
            .as_deref()
            .map(|p| absolutize(repo_root, p))
            .unwrap_or_else(|| plugin_root.join("dist"));
        let signing_key = paths
            .signing_key
            .as_deref()
            .map(|p| absolutize(repo_root, p))
            .unwrap_or_else(|| plugin_root.join("private.ppk"));
        let log_dir = log
            .dir
            .as_deref()
            .map(|p| absolutize(repo_root, p))
            .unwrap_or_else(|| repo_root.join("logs"));

        Self {
            repo_root: repo_root.to_path_buf(),
            live_dir: dist_dir.join(".dev-build"),
            staging_dir: dist_dir.join(".dev-build.staging"),
            package_dir: dist_dir.join(".dev-package"),
            dev_package: dist_dir.join("plugin-dev.zip"),
            build_dir: dist_dir.join("build"),
            build_staging_dir: dist_dir.join("build.staging"),
            release_package: dist_dir.join("plugin.zip"),
            log_file: log_dir.join(LOG_FILE_NAME),
            plugin_root,
            src_root,
            manifest,
            dist_dir,
            signing_key,
        }
    }

    /// Repository-relative display form, falling back to the full path.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

pub(crate) fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
