//! # plugdev-graph
//!
//! Bidirectional index between plugin entry points and the source files that
//! feed them. The dev server refreshes it after every successful build and
//! consults it to decide which entries a changed file invalidates.
//!
//! ## Overview
//!
//! ```text
//!   file_to_entries:  shared/util.js  -> { desktop/index.js, config/index.js }
//!   entry_to_files:   desktop/index.js -> { desktop/index.js, shared/util.js }
//! ```
//!
//! The two maps are always exact inverses. An entry may map to an empty set
//! (it has no tracked dependencies), a file never does: files that lose their
//! last entry are pruned and remembered as *retired*, so a later lookup can
//! answer "known, affects nothing" instead of "never seen".
//!
//! ## Quick Start
//!
//! ```rust
//! use plugdev_graph::{Affected, DependencyGraph};
//!
//! let mut graph = DependencyGraph::new("/work/plugin/src");
//! graph.update(
//!     "desktop/index.js",
//!     ["/work/plugin/src/desktop/index.js", "/work/plugin/src/shared/util.js"],
//! );
//!
//! assert_eq!(
//!     graph.affected_entries("/work/plugin/src/shared/util.js"),
//!     Affected::Known(["desktop/index.js".to_string()].into())
//! );
//! assert_eq!(graph.affected_entries("/work/plugin/src/new.js"), Affected::Unknown);
//! ```

mod normalize;

use std::collections::BTreeSet;
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

pub use normalize::{Normalized, SourceRoot};

/// Answer to "which entries does this file feed?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affected {
    /// The graph has a record for the file. The set may be empty.
    Known(BTreeSet<String>),
    /// The graph has never seen the file. Callers must assume every entry
    /// is affected.
    Unknown,
}

impl Affected {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Affected::Unknown)
    }
}

/// What happened to the module paths passed to [`DependencyGraph::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Distinct source files now associated with the entry.
    pub tracked: usize,
    /// `node_modules` and synthetic ids that were dropped.
    pub skipped: usize,
    /// Real paths outside the source root that were dropped.
    pub outside_root: Vec<String>,
}

/// Entry <-> source file index.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    root: SourceRoot,
    file_to_entries: FxHashMap<String, FxHashSet<String>>,
    entry_to_files: FxHashMap<String, FxHashSet<String>>,
    retired: FxHashSet<String>,
}

impl DependencyGraph {
    /// Create an empty graph whose keys are relative to `src_root`.
    pub fn new(src_root: impl AsRef<Path>) -> Self {
        Self {
            root: SourceRoot::new(src_root),
            file_to_entries: FxHashMap::default(),
            entry_to_files: FxHashMap::default(),
            retired: FxHashSet::default(),
        }
    }

    pub fn source_root(&self) -> &SourceRoot {
        &self.root
    }

    /// Replace the file set of `entry` with `module_paths`.
    ///
    /// Stale back-references are removed first; files left without any entry
    /// are pruned. Applying the same update twice yields the same state.
    pub fn update<I, S>(&mut self, entry: &str, module_paths: I) -> UpdateSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = entry.replace('\\', "/");
        self.detach(&entry);

        let mut summary = UpdateSummary::default();
        let mut files = FxHashSet::default();
        for raw in module_paths {
            match self.root.normalize(raw.as_ref()) {
                Normalized::Source(key) => {
                    files.insert(key);
                }
                Normalized::NodeModule | Normalized::Synthetic => summary.skipped += 1,
                Normalized::OutsideRoot(path) => {
                    if !summary.outside_root.contains(&path) {
                        summary.outside_root.push(path);
                    }
                }
            }
        }

        for file in &files {
            self.retired.remove(file);
            self.file_to_entries
                .entry(file.clone())
                .or_default()
                .insert(entry.clone());
        }
        summary.tracked = files.len();
        self.entry_to_files.insert(entry, files);
        summary
    }

    /// Entries that include `changed_file`, or [`Affected::Unknown`].
    ///
    /// `changed_file` may be absolute or relative to the source root.
    /// Dependencies under `node_modules` never invalidate anything.
    pub fn affected_entries(&self, changed_file: &str) -> Affected {
        match self.root.normalize(changed_file) {
            Normalized::Source(key) => match self.file_to_entries.get(&key) {
                Some(entries) => Affected::Known(entries.iter().cloned().collect()),
                None if self.retired.contains(&key) => Affected::Known(BTreeSet::new()),
                None => Affected::Unknown,
            },
            Normalized::NodeModule | Normalized::Synthetic => Affected::Known(BTreeSet::new()),
            Normalized::OutsideRoot(_) => Affected::Unknown,
        }
    }

    /// Drop all state, including the memory of retired files.
    pub fn clear(&mut self) {
        self.file_to_entries.clear();
        self.entry_to_files.clear();
        self.retired.clear();
    }

    /// Source files recorded for `entry`, sorted.
    pub fn files_of(&self, entry: &str) -> Option<BTreeSet<&str>> {
        self.entry_to_files
            .get(entry)
            .map(|files| files.iter().map(String::as_str).collect())
    }

    /// Entries recorded for a normalized file key, sorted.
    pub fn entries_of(&self, file: &str) -> Option<BTreeSet<&str>> {
        self.file_to_entries
            .get(file)
            .map(|entries| entries.iter().map(String::as_str).collect())
    }

    pub fn entry_count(&self) -> usize {
        self.entry_to_files.len()
    }

    pub fn file_count(&self) -> usize {
        self.file_to_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_to_files.is_empty() && self.file_to_entries.is_empty()
    }

    /// Check that both maps are exact inverses and no file key is empty.
    pub fn is_consistent(&self) -> bool {
        let forward = self.file_to_entries.iter().all(|(file, entries)| {
            !entries.is_empty()
                && !self.retired.contains(file)
                && entries.iter().all(|entry| {
                    self.entry_to_files
                        .get(entry)
                        .is_some_and(|files| files.contains(file))
                })
        });
        let backward = self.entry_to_files.iter().all(|(entry, files)| {
            files.iter().all(|file| {
                self.file_to_entries
                    .get(file)
                    .is_some_and(|entries| entries.contains(entry))
            })
        });
        forward && backward
    }

    fn detach(&mut self, entry: &str) {
        let Some(previous) = self.entry_to_files.remove(entry) else {
            return;
        };
        for file in previous {
            let now_empty = match self.file_to_entries.get_mut(&file) {
                Some(entries) => {
                    entries.remove(entry);
                    entries.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.file_to_entries.remove(&file);
                self.retired.insert(file);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/work/plugin/src";

    fn abs(rel: &str) -> String {
        format!("{ROOT}/{rel}")
    }

    fn known(entries: &[&str]) -> Affected {
        Affected::Known(entries.iter().map(|e| e.to_string()).collect())
    }

    #[test]
    fn test_update_links_both_directions() {
        let mut graph = DependencyGraph::new(ROOT);
        let summary = graph.update(
            "desktop/index.js",
            [abs("desktop/index.js"), abs("shared/util.js")],
        );

        assert_eq!(summary.tracked, 2);
        assert_eq!(
            graph.files_of("desktop/index.js").unwrap(),
            BTreeSet::from(["desktop/index.js", "shared/util.js"])
        );
        assert_eq!(
            graph.entries_of("shared/util.js").unwrap(),
            BTreeSet::from(["desktop/index.js"])
        );
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_shared_file_maps_to_every_entry() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", [abs("desktop/index.js"), abs("shared/util.js")]);
        graph.update("config/index.js", [abs("config/index.js"), abs("shared/util.js")]);

        assert_eq!(
            graph.affected_entries(&abs("shared/util.js")),
            known(&["config/index.js", "desktop/index.js"])
        );
        assert_eq!(
            graph.affected_entries("config/index.js"),
            known(&["config/index.js"])
        );
    }

    #[test]
    fn test_update_removes_stale_back_references() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", [abs("desktop/index.js"), abs("old.js")]);
        graph.update("desktop/index.js", [abs("desktop/index.js"), abs("new.js")]);

        assert!(graph.entries_of("old.js").is_none());
        assert_eq!(graph.file_count(), 2);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_file_dropped_by_every_entry_is_known_empty() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", [abs("desktop/index.js"), abs("shared/util.js")]);
        graph.update("desktop/index.js", [abs("desktop/index.js")]);

        assert_eq!(graph.affected_entries(&abs("shared/util.js")), known(&[]));
    }

    #[test]
    fn test_never_seen_file_is_unknown() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", [abs("desktop/index.js")]);

        assert_eq!(graph.affected_entries(&abs("new.js")), Affected::Unknown);
        assert_eq!(graph.affected_entries("/elsewhere/lib.js"), Affected::Unknown);
    }

    #[test]
    fn test_node_modules_never_enter_the_graph() {
        let mut graph = DependencyGraph::new(ROOT);
        let summary = graph.update(
            "desktop/index.js",
            [
                abs("desktop/index.js"),
                "/work/plugin/node_modules/react/index.js".to_string(),
                "\0vite/preload-helper".to_string(),
            ],
        );

        assert_eq!(summary.tracked, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            graph.affected_entries("/work/plugin/node_modules/react/index.js"),
            known(&[])
        );
    }

    #[test]
    fn test_outside_root_paths_are_reported() {
        let mut graph = DependencyGraph::new(ROOT);
        let summary = graph.update(
            "desktop/index.js",
            [abs("desktop/index.js"), "/work/shared/lib.js".into(), "/work/shared/lib.js".into()],
        );

        assert_eq!(summary.outside_root, vec!["/work/shared/lib.js".to_string()]);
        assert_eq!(graph.file_count(), 1);
    }

    #[test]
    fn test_update_is_idempotent() {
        let mut graph = DependencyGraph::new(ROOT);
        let deps = [abs("desktop/index.js"), abs("a.js"), abs("a.js")];
        graph.update("desktop/index.js", deps.clone());
        let first = graph.files_of("desktop/index.js").map(|s| s.len());
        graph.update("desktop/index.js", deps);

        assert_eq!(graph.files_of("desktop/index.js").map(|s| s.len()), first);
        assert_eq!(graph.file_count(), 2);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_entry_with_no_dependencies_is_kept() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", Vec::<String>::new());

        assert_eq!(graph.entry_count(), 1);
        assert_eq!(graph.file_count(), 0);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut graph = DependencyGraph::new(ROOT);
        graph.update("desktop/index.js", [abs("desktop/index.js"), abs("a.js")]);
        graph.update("desktop/index.js", [abs("desktop/index.js")]);
        graph.clear();

        assert!(graph.is_empty());
        assert_eq!(graph.affected_entries(&abs("a.js")), Affected::Unknown);
        assert_eq!(graph.affected_entries(&abs("desktop/index.js")), Affected::Unknown);
    }
}
