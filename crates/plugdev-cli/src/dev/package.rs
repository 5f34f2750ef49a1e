//! Dev plugin packaging.
//!
//! The dev package is the plugin with every local script reference pointed
//! at the dev server. plugdev writes the rewritten manifest; signing and
//! zipping are left to an external command.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::bundle::expand_template;
use crate::dev::worker::stderr_tail;
use crate::error::{CliError, Result};
use crate::manifest::Manifest;

/// Everything a packager needs for one dev package.
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub manifest: Manifest,
    /// Directory of the source manifest; icons and css resolve against it
    pub manifest_dir: PathBuf,
    pub signing_key: PathBuf,
    /// e.g. `https://localhost:5173/__static/js`
    pub base_url: String,
    /// Live reload client URL to prepend, when injection is on
    pub live_client: Option<String>,
    /// Archive path, e.g. `<dist>/plugin-dev.zip`
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutcome {
    pub manifest_path: PathBuf,
    /// Written archive, if the packager produced one
    pub archive: Option<PathBuf>,
    pub plugin_id: Option<String>,
}

#[async_trait]
pub trait DevPackager: Send + Sync {
    async fn package(&self, request: &PackageRequest) -> Result<PackageOutcome>;
}

/// Writes the dev manifest, then runs `package.command` if configured.
///
/// Template placeholders: `{manifest}`, `{manifest_dir}`, `{ppk}`,
/// `{output}`, `{base_url}`.
#[derive(Debug, Clone)]
pub struct CommandPackager {
    command: Vec<String>,
    package_dir: PathBuf,
}

impl CommandPackager {
    pub fn new(command: Vec<String>, package_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            package_dir: package_dir.into(),
        }
    }

    fn write_manifest(&self, request: &PackageRequest) -> Result<PathBuf> {
        let dev = request
            .manifest
            .to_dev_manifest(&request.base_url, request.live_client.as_deref());
        fs::create_dir_all(&self.package_dir)?;
        let path = self.package_dir.join("manifest.json");
        fs::write(&path, dev.to_pretty_json()?)?;
        Ok(path)
    }
}

#[async_trait]
impl DevPackager for CommandPackager {
    async fn package(&self, request: &PackageRequest) -> Result<PackageOutcome> {
        let manifest_path = self.write_manifest(request)?;
        tracing::debug!(path = %manifest_path.display(), "Dev manifest written");

        let Some((program, args)) = self.command.split_first() else {
            return Ok(PackageOutcome {
                manifest_path,
                archive: None,
                plugin_id: None,
            });
        };

        let vars = [
            ("manifest", path_arg(&manifest_path)),
            ("manifest_dir", path_arg(&request.manifest_dir)),
            ("ppk", path_arg(&request.signing_key)),
            ("output", path_arg(&request.output)),
            ("base_url", request.base_url.clone()),
        ];
        let args: Vec<String> = args.iter().map(|a| expand_template(a, &vars)).collect();

        let output = Command::new(expand_template(program, &vars))
            .args(&args)
            .current_dir(&request.manifest_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CliError::Package(format!("Failed to run {program}: {e}")))?;

        if !output.status.success() {
            return Err(CliError::Package(format!(
                "{program} exited with {}\n{}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(PackageOutcome {
            manifest_path,
            archive: request.output.exists().then(|| request.output.clone()),
            plugin_id: parse_plugin_id(&stdout),
        })
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Plugin id from packager output: the last non-empty line, or its `id`
/// field when that line is a JSON object.
pub fn parse_plugin_id(stdout: &str) -> Option<String> {
    let last = stdout.lines().map(str::trim).rfind(|l| !l.is_empty())?;
    match serde_json::from_str::<Value>(last) {
        Ok(Value::Object(map)) => map.get("id").and_then(Value::as_str).map(str::to_string),
        _ => Some(last.to_string()),
    }
}
