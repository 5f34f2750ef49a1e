//! Which entries a change batch rebuilds.

use std::collections::BTreeSet;

use plugdev_graph::{Affected, DependencyGraph};

use crate::dev::scheduler::ChangeBatch;
use crate::manifest::EntryInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    /// Every entry, into an emptied output directory
    Full(FullReason),
    /// Only these entry indices; other outputs stay valid
    Incremental(Vec<usize>),
    /// The changed files feed no entry
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullReason {
    Initial,
    ManifestChanged,
    Manual,
    /// A changed file the graph has never seen
    UnknownFile(String),
}

impl std::fmt::Display for FullReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FullReason::Initial => f.write_str("initial build"),
            FullReason::ManifestChanged => f.write_str("manifest changed"),
            FullReason::Manual => f.write_str("manual trigger"),
            FullReason::UnknownFile(file) => write!(f, "{file} is not in the dependency graph"),
        }
    }
}

impl BuildPlan {
    pub fn is_full(&self) -> bool {
        matches!(self, BuildPlan::Full(_))
    }

    /// Indices to hand to the worker.
    pub fn indices(&self, entries: &[EntryInfo]) -> Vec<usize> {
        match self {
            BuildPlan::Full(_) => entries.iter().map(|e| e.index).collect(),
            BuildPlan::Incremental(indices) => indices.clone(),
            BuildPlan::Nothing => Vec::new(),
        }
    }
}

/// Resolve a batch against the graph. Any unknown file widens the plan to
/// a full rebuild.
pub fn plan_build(batch: &ChangeBatch, graph: &DependencyGraph, entries: &[EntryInfo]) -> BuildPlan {
    if batch.manifest_changed {
        return BuildPlan::Full(FullReason::ManifestChanged);
    }
    if batch.forced {
        return BuildPlan::Full(FullReason::Manual);
    }

    let mut affected: BTreeSet<String> = BTreeSet::new();
    for file in &batch.files {
        match graph.affected_entries(file) {
            Affected::Unknown => {
                tracing::debug!(file = %file, "Unknown file, rebuilding everything");
                return BuildPlan::Full(FullReason::UnknownFile(file.clone()));
            }
            Affected::Known(set) => {
                tracing::debug!(file = %file, entries = ?set, "Graph lookup");
                affected.extend(set);
            }
        }
    }

    let indices: Vec<usize> = entries
        .iter()
        .filter(|e| affected.contains(&e.relative_path))
        .map(|e| e.index)
        .collect();
    if indices.is_empty() {
        BuildPlan::Nothing
    } else {
        BuildPlan::Incremental(indices)
    }
}
