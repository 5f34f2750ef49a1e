//! Uploading the dev package to the platform.
//!
//! The install/update/reinstall ladder belongs to the configured command;
//! plugdev only hands it the archive, the known plugin id and credentials.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::bundle::expand_template;
use crate::config::{Credentials, UploadTarget};
use crate::dev::worker::stderr_tail;
use crate::error::{CliError, Result};
use crate::manifest::PluginVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub plugin_id: Option<String>,
}

/// What the platform reports after installing or updating.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    pub id: String,
    #[serde(default)]
    pub version: Option<PluginVersion>,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt>;
}

/// Runs `upload.command` with `{file}` and `{plugin_id}` expanded and the
/// credentials exported as `KINTONE_DEV_*` (or the target's prefix). The
/// command prints `{"id": ..., "version": ...}` as its last stdout line.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    command: Vec<String>,
    credentials: Credentials,
    target: UploadTarget,
}

impl CommandUploader {
    pub fn new(command: Vec<String>, credentials: Credentials) -> Self {
        Self {
            command,
            credentials,
            target: UploadTarget::Dev,
        }
    }

    pub fn with_target(mut self, target: UploadTarget) -> Self {
        self.target = target;
        self
    }
}

#[async_trait]
impl Uploader for CommandUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            CliError::Upload(
                "upload.command is empty; configure the command that installs the dev package"
                    .to_string(),
            )
        })?;

        let vars = [
            ("file", request.file.to_string_lossy().into_owned()),
            ("plugin_id", request.plugin_id.clone().unwrap_or_default()),
        ];
        let args: Vec<String> = args.iter().map(|a| expand_template(a, &vars)).collect();

        let prefix = self.target.env_prefix();
        let output = Command::new(program)
            .args(&args)
            .env(format!("{prefix}_BASE_URL"), &self.credentials.base_url)
            .env(format!("{prefix}_USERNAME"), &self.credentials.username)
            .env(format!("{prefix}_PASSWORD"), &self.credentials.password)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CliError::Upload(format!("Failed to run {program}: {e}")))?;

        if !output.status.success() {
            return Err(CliError::Upload(format!(
                "{program} exited with {}\n{}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_receipt(&stdout).ok_or_else(|| {
            CliError::Upload(format!(
                "{program} did not print an {{\"id\", \"version\"}} object"
            ))
        })
    }
}

/// The last stdout line that parses as a receipt.
pub fn parse_receipt(stdout: &str) -> Option<UploadReceipt> {
    stdout
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str(line.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            base_url: "https://example.cybozu.com".to_string(),
            username: "admin".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn test_parse_receipt() {
        let receipt = parse_receipt("uploading\n{\"id\":\"abc\",\"version\":\"3\"}\n").unwrap();
        assert_eq!(receipt.id, "abc");
        assert_eq!(receipt.version, Some(PluginVersion::Text("3".to_string())));

        let numeric = parse_receipt(r#"{"id":"abc","version":4}"#).unwrap();
        assert_eq!(numeric.version, Some(PluginVersion::Number(4)));

        assert!(parse_receipt("done\n").is_none());
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let uploader = CommandUploader::new(Vec::new(), credentials());
        let request = UploadRequest {
            file: PathBuf::from("plugin-dev.zip"),
            plugin_id: None,
        };
        assert!(matches!(
            uploader.upload(&request).await,
            Err(CliError::Upload(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sees_credentials_and_arguments() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '{"id":"%s","version":"%s"}\n' "$1" "$KINTONE_DEV_USERNAME""#.to_string(),
            "sh".to_string(),
            "{plugin_id}".to_string(),
        ];
        let uploader = CommandUploader::new(command, credentials());
        let receipt = uploader
            .upload(&UploadRequest {
                file: PathBuf::from("plugin-dev.zip"),
                plugin_id: Some("known-id".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(receipt.id, "known-id");
        assert_eq!(receipt.version, Some(PluginVersion::Text("admin".to_string())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_production_target_exports_prod_variables() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '{"id":"%s","version":"1"}\n' "${KINTONE_PROD_USERNAME:-missing}""#.to_string(),
        ];
        let uploader = CommandUploader::new(command, credentials()).with_target(UploadTarget::Prod);
        let receipt = uploader
            .upload(&UploadRequest {
                file: PathBuf::from("plugin.zip"),
                plugin_id: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.id, "admin");
    }
}
