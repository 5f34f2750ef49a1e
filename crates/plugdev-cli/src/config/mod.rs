//! Configuration with multi-source loading.
//!
//! Merges defaults, `plugdev.toml`, the repository `.env`, the process
//! environment and CLI flags, in that order of increasing priority, then
//! resolves the result into [`Settings`] with every duration parsed and every
//! path made absolute.

pub mod defaults;
mod duration;
mod env;
mod loading;
mod paths;
mod settings;
mod types;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

pub use duration::{format_duration, parse_duration};
pub use env::{EnvMap, config_key, load_dotenv, merge_env, parse_bool, parse_dotenv, process_env};
pub use loading::{ConfigOverrides, LoadOptions, LoadedConfig};
pub use paths::{ProjectPaths, env_file, find_repo_root};
pub use settings::{Credentials, LogSettings, ServerSettings, Settings, UploadSettings, UploadTarget};
pub use types::*;

/// plugdev configuration, as read from `plugdev.toml` and the environment.
///
/// ```toml
/// [dev]
/// mode = "lazy"
/// lazy_window = "45s"
/// port = 5173
/// https_domains = ["dev.example.test"]
///
/// [bundler]
/// command = ["npx", "esbuild", "{input}", "--bundle", "--format=iife",
///            "--outfile={output}", "--metafile={metafile}"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlugdevConfig {
    pub paths: PathsSection,
    pub dev: DevSection,
    pub log: LogSection,
    pub manifest: ManifestSection,
    pub bundler: BundlerSection,
    pub package: PackageSection,
    pub upload: UploadSection,
    pub tls: TlsSection,
}
