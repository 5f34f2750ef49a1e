use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::defaults::*;

/// Rebuild scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevMode {
    /// Rebuild shortly after each change burst
    #[default]
    Instant,
    /// Rebuild only after the sources have been quiet for the whole window
    Lazy,
}

impl fmt::Display for DevMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevMode::Instant => f.write_str("instant"),
            DevMode::Lazy => f.write_str("lazy"),
        }
    }
}

/// How manifest validation results are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValidateMode {
    /// Errors are fatal at startup and abort manifest-change rebuilds
    #[default]
    Strict,
    /// Errors are logged as warnings
    Warn,
    /// Validation is skipped
    Off,
}

/// A duration as written by the user, parsed during resolution so errors
/// can name the offending field. Accepts strings and bare numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationText(pub String);

impl DurationText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for DurationText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DurationText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TextVisitor;

        impl Visitor<'_> for TextVisitor {
            type Value = DurationText;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as \"45s\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(DurationText(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(DurationText(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(DurationText(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(DurationText(v.to_string()))
            }
        }

        deserializer.deserialize_any(TextVisitor)
    }
}

/// A list of domains, written either as a TOML array or a comma-separated
/// string (the `DEV_HTTPS_DOMAINS` form).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainList(pub Vec<String>);

impl<'de> Deserialize<'de> for DomainList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = DomainList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of domains or a comma-separated string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(DomainList(
                    v.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string)
                        .collect(),
                ))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut domains = Vec::new();
                while let Some(domain) = seq.next_element::<String>()? {
                    let domain = domain.trim();
                    if !domain.is_empty() {
                        domains.push(domain.to_string());
                    }
                }
                Ok(DomainList(domains))
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

/// `[paths]`: where the plugin lives, relative to the repository root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<PathBuf>,
}

/// `[dev]`: server and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevSection {
    pub mode: DevMode,
    pub lazy_window: DurationText,
    pub coalesce_delay: DurationText,
    /// `0` disables the limit
    pub worker_timeout: DurationText,
    pub host: String,
    pub port: u16,
    pub https_domains: DomainList,
    pub serve_source_fallback: bool,
    pub inject_client: bool,
}

impl Default for DevSection {
    fn default() -> Self {
        Self {
            mode: DevMode::Instant,
            lazy_window: DurationText::new(DEFAULT_LAZY_WINDOW),
            coalesce_delay: DurationText::new(DEFAULT_COALESCE_DELAY),
            worker_timeout: DurationText::new(DEFAULT_WORKER_TIMEOUT),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            https_domains: DomainList::default(),
            serve_source_fallback: true,
            inject_client: true,
        }
    }
}

/// `[log]`: the JSON-lines dev log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    pub local_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub quiet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_env: Option<String>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            local_enabled: true,
            dir: None,
            quiet: false,
            node_env: None,
        }
    }
}

/// `[manifest]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManifestSection {
    pub validate: ValidateMode,
}

/// `[bundler]`: the external compile step run by the build worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundlerSection {
    pub command: Vec<String>,
    pub suppress_warnings: Vec<String>,
}

impl Default for BundlerSection {
    fn default() -> Self {
        Self {
            command: default_bundler_command(),
            suppress_warnings: default_suppressed_warnings(),
        }
    }
}

/// `[package]`: dev plugin packaging. An empty command only writes the
/// rewritten manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageSection {
    pub command: Vec<String>,
}

/// `[upload]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadSection {
    pub enabled: bool,
    pub command: Vec<String>,
}

/// `[tls]`: PEM files for HTTPS. Either both `cert` and `key`, or a `dir`
/// holding `cert.pem` and `key.pem`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}
