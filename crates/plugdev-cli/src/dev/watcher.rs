//! Source tree watcher.
//!
//! Watches the plugin source root and classifies every qualifying change as
//! either the manifest or a source file (by graph key). Everything else is
//! filtered out here, before it reaches the scheduler.

use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use plugdev_graph::{Normalized, SourceRoot};
use tokio::sync::mpsc;

use crate::error::{CliError, Result};

/// Directory names never worth a rebuild.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", ".svn", ".hg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeTarget {
    Manifest,
    /// Graph key relative to the source root
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    pub target: ChangeTarget,
}

/// Decides which paths matter and what they are.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    source_root: SourceRoot,
    /// The source root as given and canonicalized; events may use either
    roots: Vec<PathBuf>,
    manifests: Vec<PathBuf>,
    /// Build output directories, in case they live under the source root
    ignored: Vec<PathBuf>,
}

impl ChangeFilter {
    pub fn new(src_root: &Path, manifest: &Path, ignored: Vec<PathBuf>) -> Self {
        let with_canonical = |path: &Path| {
            let mut forms = vec![path.to_path_buf()];
            if let Ok(canonical) = path.canonicalize() {
                if canonical != path {
                    forms.push(canonical);
                }
            }
            forms
        };
        Self {
            source_root: SourceRoot::new(src_root),
            roots: with_canonical(src_root),
            manifests: with_canonical(manifest),
            ignored: ignored.iter().flat_map(|p| with_canonical(p)).collect(),
        }
    }

    pub fn classify(&self, path: &Path) -> Option<ChangeTarget> {
        if self.manifests.iter().any(|m| m == path) {
            return Some(ChangeTarget::Manifest);
        }
        if self.ignored.iter().any(|dir| path.starts_with(dir)) {
            return None;
        }
        let (root, relative) = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok().map(|rel| (root, rel)))?;
        if is_ignored(relative) {
            return None;
        }

        let absolute = self.source_root.join(&relative.to_string_lossy());
        match self.source_root.normalize(&absolute.to_string_lossy()) {
            Normalized::Source(key) => Some(ChangeTarget::Source(key)),
            other => {
                tracing::debug!(path = %path.display(), root = %root.display(), ?other, "Ignoring change");
                None
            }
        }
    }
}

/// Hidden names, VCS and dependency directories, logs, editor and bundler
/// scratch files.
fn is_ignored(relative: &Path) -> bool {
    let mut names = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .peekable();
    if names.peek().is_none() {
        return true;
    }
    let names: Vec<&str> = names.collect();
    if names
        .iter()
        .any(|name| name.starts_with('.') || IGNORED_DIRS.contains(name))
    {
        return true;
    }
    let file = names.last().copied().unwrap_or_default();
    file.ends_with(".log")
        || file.ends_with('~')
        || file.ends_with(".swp")
        || file.ends_with(".tmp")
        || file.contains(".timestamp-")
        || file == "4913"
}

/// Keeps the OS watch alive; dropping it stops the events.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl SourceWatcher {
    /// Watch `src_root` (and the manifest's directory when it lives
    /// elsewhere). Events arrive on the returned channel.
    pub fn start(
        src_root: &Path,
        manifest: &Path,
        ignored: Vec<PathBuf>,
    ) -> Result<(Self, mpsc::Receiver<WatchEvent>)> {
        if !src_root.exists() {
            return Err(CliError::FileNotFound(src_root.to_path_buf()));
        }

        let (tx, rx) = mpsc::channel(256);
        let filter = ChangeFilter::new(src_root, manifest, ignored);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "File watcher error");
                    return;
                }
            };
            let kind = match event.kind {
                EventKind::Create(_) => ChangeKind::Added,
                EventKind::Remove(_) => ChangeKind::Removed,
                EventKind::Modify(ModifyKind::Metadata(_)) => return,
                EventKind::Modify(_) => ChangeKind::Changed,
                _ => return,
            };
            for path in &event.paths {
                if let Some(target) = filter.classify(path) {
                    // The receiver is gone only while shutting down.
                    let _ = tx.blocking_send(WatchEvent { kind, target });
                }
            }
        })?;

        watcher.watch(src_root, RecursiveMode::Recursive)?;
        if !manifest.starts_with(src_root) {
            if let Some(dir) = manifest.parent() {
                watcher.watch(dir, RecursiveMode::NonRecursive)?;
            }
        }

        Ok((
            Self {
                _watcher: watcher,
                root: src_root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ChangeFilter {
        ChangeFilter::new(
            Path::new("/work/plugin/src"),
            Path::new("/work/plugin/src/manifest.json"),
            vec![PathBuf::from("/work/plugin/src/.dev-out")],
        )
    }

    fn source(key: &str) -> Option<ChangeTarget> {
        Some(ChangeTarget::Source(key.to_string()))
    }

    #[test]
    fn test_classifies_manifest_and_sources() {
        let f = filter();
        assert_eq!(
            f.classify(Path::new("/work/plugin/src/manifest.json")),
            Some(ChangeTarget::Manifest)
        );
        assert_eq!(
            f.classify(Path::new("/work/plugin/src/desktop/index.js")),
            source("desktop/index.js")
        );
        assert_eq!(
            f.classify(Path::new("/work/plugin/src/shared/ui/button.jsx")),
            source("shared/ui/button.jsx")
        );
    }

    #[test]
    fn test_ignores_noise() {
        let f = filter();
        for path in [
            "/work/plugin/src/node_modules/react/index.js",
            "/work/plugin/src/.git/HEAD",
            "/work/plugin/src/.hidden/file.js",
            "/work/plugin/src/.dev-out/js/index.js",
            "/work/plugin/src/debug.log",
            "/work/plugin/src/desktop/index.js~",
            "/work/plugin/src/desktop/.index.js.swp",
            "/work/plugin/src/vite.config.js.timestamp-1700000000.mjs",
            "/work/plugin/src",
        ] {
            assert_eq!(f.classify(Path::new(path)), None, "{path}");
        }
    }

    #[test]
    fn test_ignores_outside_root() {
        let f = filter();
        assert_eq!(f.classify(Path::new("/work/plugin/dist/js/index.js")), None);
        assert_eq!(f.classify(Path::new("/elsewhere/a.js")), None);
    }

    #[test]
    fn test_manifest_outside_source_root() {
        let f = ChangeFilter::new(
            Path::new("/work/plugin/src"),
            Path::new("/work/plugin/manifest.json"),
            Vec::new(),
        );
        assert_eq!(
            f.classify(Path::new("/work/plugin/manifest.json")),
            Some(ChangeTarget::Manifest)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reports_real_changes() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("desktop")).unwrap();
        let manifest = src.join("manifest.json");

        let (_watcher, mut rx) = SourceWatcher::start(&src, &manifest, Vec::new()).unwrap();
        std::fs::write(src.join("desktop/index.js"), "export {}").unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.target == ChangeTarget::Source("desktop/index.js".to_string()) {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_ne!(event.kind, ChangeKind::Removed);
    }

    #[test]
    fn test_missing_root() {
        let result = SourceWatcher::start(
            Path::new("/definitely/not/here/src"),
            Path::new("/definitely/not/here/src/manifest.json"),
            Vec::new(),
        );
        assert!(matches!(result, Err(CliError::FileNotFound(_))));
    }
}
