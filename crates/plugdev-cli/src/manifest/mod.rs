//! Typed plugin manifest.
//!
//! The manifest is read once as raw JSON (validators see exactly what is on
//! disk), then parsed into [`Manifest`]. Everything downstream works on the
//! typed value: entry extraction for the build, and the script URL rewrite
//! that produces the dev plugin's manifest.

mod validate;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, ManifestError};

pub use validate::{ManifestValidator, SchemaValidator, ValidationReport, validation_failure};

/// Localized text, keyed by language code (`en`, `ja`, ...).
pub type Localized = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Manifest {
    pub manifest_version: u32,
    pub version: PluginVersion,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Localized,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Localized>,
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<Localized>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<ScriptSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<ScriptSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSection>,
    /// Keys this model does not know about, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `version` may be an integer or a dotted string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PluginVersion {
    Number(u64),
    Text(String),
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginVersion::Number(n) => write!(f, "{n}"),
            PluginVersion::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptSection {
    #[serde(default)]
    pub js: Vec<String>,
    #[serde(default)]
    pub css: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    pub js: Vec<String>,
    #[serde(default)]
    pub css: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_params: Vec<String>,
}

/// Which manifest section an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Desktop,
    Mobile,
    Config,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::Desktop => "desktop",
            EntryKind::Mobile => "mobile",
            EntryKind::Config => "config",
        })
    }
}

/// One local script the bundler compiles into its own output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub kind: EntryKind,
    /// Relative to the source root, forward slashes. The graph key.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub index: usize,
}

impl EntryInfo {
    /// Output stem: `desktop/index.js` compiles to `js/index.js`.
    pub fn output_name(&self) -> String {
        output_stem(&self.relative_path)
    }

    /// Output file relative to the build output directory.
    pub fn output_file(&self) -> String {
        format!("js/{}.js", self.output_name())
    }
}

fn output_stem(reference: &str) -> String {
    let file = reference.rsplit('/').next().unwrap_or(reference);
    match file.rfind('.') {
        Some(dot) if dot > 0 => file[..dot].to_string(),
        _ => file.to_string(),
    }
}

/// `http://` and `https://` references are hosted elsewhere and never built.
pub fn is_remote(reference: &str) -> bool {
    let lower = reference.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_dev_script(reference: &str) -> bool {
    let normalized = normalize_reference(reference);
    let path = normalized.split(['?', '#']).next().unwrap_or_default();
    path.ends_with("/__live/client.js")
        || path == "dev/live-reload.js"
        || path.ends_with("/dev/live-reload.js")
}

fn normalize_reference(reference: &str) -> String {
    let slashed = reference.trim().replace('\\', "/");
    let mut rest = slashed.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

impl Manifest {
    /// Read the manifest as raw JSON.
    pub fn read_raw(path: &Path) -> Result<Value, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_value(path: &Path, raw: &Value) -> Result<Self, ManifestError> {
        Self::deserialize(raw).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = Self::read_raw(path)?;
        Self::from_value(path, &raw)
    }

    fn script_lists(&self) -> [(EntryKind, &[String]); 3] {
        [
            (
                EntryKind::Desktop,
                self.desktop.as_ref().map(|s| s.js.as_slice()).unwrap_or_default(),
            ),
            (
                EntryKind::Mobile,
                self.mobile.as_ref().map(|s| s.js.as_slice()).unwrap_or_default(),
            ),
            (
                EntryKind::Config,
                self.config.as_ref().map(|s| s.js.as_slice()).unwrap_or_default(),
            ),
        ]
    }

    /// Local script entries in manifest order (desktop, mobile, config),
    /// deduplicated by relative path with the first occurrence winning.
    pub fn entries(&self, src_root: &Path, manifest_path: &Path) -> Result<Vec<EntryInfo>, ConfigError> {
        let mut entries: Vec<EntryInfo> = Vec::new();
        let mut outputs: HashMap<String, String> = HashMap::new();

        for (kind, scripts) in self.script_lists() {
            for reference in scripts {
                if is_remote(reference) {
                    continue;
                }
                let relative_path = normalize_reference(reference);
                if relative_path.is_empty()
                    || entries.iter().any(|e| e.relative_path == relative_path)
                {
                    continue;
                }

                let name = output_stem(&relative_path);
                if let Some(first) = outputs.get(&name) {
                    return Err(ConfigError::OutputCollision {
                        name,
                        first: first.clone(),
                        second: relative_path,
                    });
                }
                outputs.insert(name, relative_path.clone());

                entries.push(EntryInfo {
                    kind,
                    absolute_path: src_root.join(&relative_path),
                    index: entries.len(),
                    relative_path,
                });
            }
        }

        if entries.is_empty() {
            return Err(ConfigError::NoEntries(manifest_path.to_path_buf()));
        }
        Ok(entries)
    }

    /// Copy of the manifest whose local scripts load from the dev server.
    ///
    /// Every local `js` reference becomes `<base_url>/<stem>.js`. With
    /// `live_client`, that script is prepended to the desktop and mobile
    /// lists so pages reload after each build.
    pub fn to_dev_manifest(&self, base_url: &str, live_client: Option<&str>) -> Manifest {
        let base_url = base_url.trim_end_matches('/');
        let rewrite = |scripts: &mut Vec<String>| {
            for script in scripts.iter_mut() {
                if !is_remote(script) {
                    *script = format!("{}/{}.js", base_url, output_stem(&normalize_reference(script)));
                }
            }
        };

        let mut dev = self.clone();
        for section in [dev.desktop.as_mut(), dev.mobile.as_mut()].into_iter().flatten() {
            rewrite(&mut section.js);
            if let Some(client) = live_client {
                if !section.js.iter().any(|s| s == client) {
                    section.js.insert(0, client.to_string());
                }
            }
        }
        if let Some(config) = dev.config.as_mut() {
            rewrite(&mut config.js);
        }
        dev
    }

    /// Copy of the manifest without live reload scripts: the dev server's
    /// `/__live/client.js` and any local `dev/live-reload.js`.
    pub fn without_dev_scripts(&self) -> Manifest {
        let mut release = self.clone();
        let sections = [
            release.desktop.as_mut().map(|s| &mut s.js),
            release.mobile.as_mut().map(|s| &mut s.js),
            release.config.as_mut().map(|c| &mut c.js),
        ];
        for scripts in sections.into_iter().flatten() {
            scripts.retain(|script| !is_dev_script(script));
        }
        release
    }

    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Manifest {
        serde_json::from_value(json!({
            "manifest_version": 1,
            "version": "1.2.0",
            "type": "APP",
            "name": {"en": "Sample"},
            "icon": "image/icon.png",
            "desktop": {
                "js": ["https://cdn.example.com/lib.js", "desktop/index.js", "./common/shared.js"],
                "css": ["css/desktop.css"]
            },
            "mobile": {"js": ["mobile\\main.js", "desktop/index.js"]},
            "config": {"html": "html/config.html", "js": ["config/config.js"], "required_params": ["appId"]},
            "x-custom": {"kept": true}
        }))
        .unwrap()
    }

    #[test]
    fn test_entries_in_manifest_order() {
        let manifest = sample();
        let entries = manifest
            .entries(Path::new("/p/src"), Path::new("/p/src/manifest.json"))
            .unwrap();

        let rel: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(
            rel,
            ["desktop/index.js", "common/shared.js", "mobile/main.js", "config/config.js"]
        );
        assert_eq!(entries[2].kind, EntryKind::Mobile);
        assert_eq!(entries[2].absolute_path, Path::new("/p/src/mobile/main.js"));
        assert!(entries.iter().enumerate().all(|(i, e)| e.index == i));
        assert_eq!(entries[1].output_file(), "js/shared.js");
    }

    #[test]
    fn test_duplicate_reference_keeps_first_kind() {
        let entries = sample()
            .entries(Path::new("/p/src"), Path::new("/p/src/manifest.json"))
            .unwrap();
        let index = entries
            .iter()
            .find(|e| e.relative_path == "desktop/index.js")
            .unwrap();
        assert_eq!(index.kind, EntryKind::Desktop);
    }

    #[test]
    fn test_output_collision() {
        let mut manifest = sample();
        manifest.config.as_mut().unwrap().js = vec!["config/index.js".to_string()];

        let err = manifest
            .entries(Path::new("/p/src"), Path::new("/p/src/manifest.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutputCollision { ref name, .. } if name == "index"));
    }

    #[test]
    fn test_no_local_entries() {
        let manifest: Manifest = serde_json::from_value(json!({
            "manifest_version": 1,
            "version": 3,
            "type": "APP",
            "name": {"en": "Remote only"},
            "icon": "icon.png",
            "desktop": {"js": ["https://cdn.example.com/app.js"]}
        }))
        .unwrap();

        let err = manifest
            .entries(Path::new("/p/src"), Path::new("/p/src/manifest.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoEntries(_)));
        assert_eq!(manifest.version.to_string(), "3");
    }

    #[test]
    fn test_unknown_keys_survive() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["x-custom"]["kept"], true);
        assert_eq!(value["type"], "APP");
    }

    #[test]
    fn test_dev_manifest() {
        let dev = sample().to_dev_manifest(
            "https://localhost:5173/__static/js/",
            Some("https://localhost:5173/__live/client.js"),
        );
        insta::assert_json_snapshot!("dev_manifest", dev);
    }

    #[test]
    fn test_dev_manifest_without_client() {
        let dev = sample().to_dev_manifest("http://127.0.0.1:5173/__static/js", None);
        let desktop = dev.desktop.unwrap();
        assert_eq!(desktop.js[0], "https://cdn.example.com/lib.js");
        assert_eq!(desktop.js[1], "http://127.0.0.1:5173/__static/js/index.js");
        assert_eq!(desktop.css, ["css/desktop.css"]);
    }

    #[test]
    fn test_without_dev_scripts() {
        let mut manifest = sample();
        if let Some(desktop) = manifest.desktop.as_mut() {
            desktop.js.insert(0, "https://localhost:5173/__live/client.js".to_string());
            desktop.js.push("dev/live-reload.js".to_string());
        }
        if let Some(config) = manifest.config.as_mut() {
            config.js.push("./dev/live-reload.js?v=2".to_string());
            config.js.push("config/devtools.js".to_string());
        }

        let release = manifest.without_dev_scripts();
        assert_eq!(
            release.desktop.unwrap().js,
            ["https://cdn.example.com/lib.js", "desktop/index.js", "./common/shared.js"]
        );
        assert_eq!(
            release.config.unwrap().js,
            ["config/config.js", "config/devtools.js"]
        );
        assert_eq!(release.mobile, manifest.mobile);
    }
}
