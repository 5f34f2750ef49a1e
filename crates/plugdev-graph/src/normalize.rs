//! Canonical form for module paths reported by the bundler.
//!
//! Graph keys are paths relative to the plugin source root, always using
//! forward slashes, with `.`/`..` segments resolved. Anything that cannot be
//! expressed that way is classified instead of stored.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

/// Prefixes bundlers use for synthetic modules that have no file behind them.
const SYNTHETIC_PREFIXES: &[&str] = &["\0", "virtual:", "(disabled)", "data:"];

/// Outcome of normalizing one raw module path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// A file under the source root, as a graph key.
    Source(String),
    /// A path inside `node_modules`. Never watched, never invalidates.
    NodeModule,
    /// A synthetic module id with no backing file.
    Synthetic,
    /// A real path that does not live under the source root.
    OutsideRoot(String),
}

/// The directory all graph keys are relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    root: String,
}

impl SourceRoot {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let cleaned = to_slashes(&root.as_ref().to_path_buf().clean());
        let root = match cleaned.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Self { root }
    }

    /// The root as a forward-slash string without a trailing separator.
    pub fn as_str(&self) -> &str {
        &self.root
    }

    /// Absolute filesystem path for a graph key.
    pub fn join(&self, key: &str) -> PathBuf {
        Path::new(&self.root).join(key)
    }

    /// Classify a raw module path.
    ///
    /// Absolute paths are rebased onto the root. Relative paths are taken to
    /// be relative to the root already. Query strings (`?inline`, `?raw`)
    /// are stripped because they still name the same file.
    pub fn normalize(&self, raw: &str) -> Normalized {
        let raw = raw.trim();
        if raw.is_empty() || SYNTHETIC_PREFIXES.iter().any(|p| raw.starts_with(p)) {
            return Normalized::Synthetic;
        }

        let without_query = raw.split(['?', '#']).next().unwrap_or(raw);
        let slashed = without_query.replace('\\', "/");

        if slashed.starts_with("node_modules/") || slashed.contains("/node_modules/") {
            return Normalized::NodeModule;
        }

        let cleaned = to_slashes(&PathBuf::from(&slashed).clean());

        if is_absolute(&cleaned) {
            let prefix = if self.root == "/" {
                "/".to_string()
            } else {
                format!("{}/", self.root)
            };
            return match cleaned.strip_prefix(&prefix) {
                Some(rel) if !rel.is_empty() => Normalized::Source(rel.to_string()),
                _ => Normalized::OutsideRoot(cleaned),
            };
        }

        if cleaned == "." || cleaned == ".." || cleaned.starts_with("../") {
            return Normalized::OutsideRoot(cleaned);
        }

        Normalized::Source(cleaned.trim_start_matches("./").to_string())
    }
}

fn to_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/')
}
