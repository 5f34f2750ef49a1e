//! Dev package publishing: package, remember the plugin id, maybe upload.
//!
//! Runs after the initial build and after every successful manifest-change
//! rebuild. Failures are logged and never stop the dev server.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dev::package::{DevPackager, PackageRequest};
use crate::dev::upload::{UploadRequest, Uploader};
use crate::manifest::Manifest;

/// Whether and how the dev package is uploaded.
#[derive(Clone)]
pub enum UploadMode {
    Disabled,
    /// Upload was requested but `KINTONE_DEV_*` credentials are incomplete
    MissingCredentials,
    Enabled(Arc<dyn Uploader>),
}

impl std::fmt::Debug for UploadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadMode::Disabled => f.write_str("Disabled"),
            UploadMode::MissingCredentials => f.write_str("MissingCredentials"),
            UploadMode::Enabled(_) => f.write_str("Enabled"),
        }
    }
}

/// Where the dev package goes and what it points at.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    pub manifest_dir: PathBuf,
    pub signing_key: PathBuf,
    pub archive: PathBuf,
    /// `<origin>/__static/js`
    pub base_url: String,
    pub live_client: Option<String>,
}

pub struct DevPublisher {
    packager: Arc<dyn DevPackager>,
    upload: UploadMode,
    target: PublishTarget,
    plugin_id: Arc<RwLock<Option<String>>>,
}

impl DevPublisher {
    pub fn new(
        packager: Arc<dyn DevPackager>,
        upload: UploadMode,
        target: PublishTarget,
        plugin_id: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            packager,
            upload,
            target,
            plugin_id,
        }
    }

    pub fn plugin_id(&self) -> Option<String> {
        self.plugin_id.read().clone()
    }

    /// Package the dev plugin for `manifest` and upload it when enabled.
    /// Returns whether an upload succeeded.
    pub async fn publish(&self, manifest: &Manifest) -> bool {
        let request = PackageRequest {
            manifest: manifest.clone(),
            manifest_dir: self.target.manifest_dir.clone(),
            signing_key: self.target.signing_key.clone(),
            base_url: self.target.base_url.clone(),
            live_client: self.target.live_client.clone(),
            output: self.target.archive.clone(),
        };

        let outcome = match self.packager.package(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "Failed to package the dev plugin");
                return false;
            }
        };

        if let Some(id) = &outcome.plugin_id {
            *self.plugin_id.write() = Some(id.clone());
            tracing::info!(plugin_id = %id, "Dev plugin packaged");
        } else {
            tracing::info!(manifest = %outcome.manifest_path.display(), "Dev manifest written");
        }

        let uploader = match &self.upload {
            UploadMode::Disabled => {
                tracing::debug!("Upload disabled; set DEV_UPLOAD=true to install the dev plugin automatically");
                return false;
            }
            UploadMode::MissingCredentials => {
                tracing::warn!(
                    "DEV_UPLOAD is on but KINTONE_DEV_BASE_URL, KINTONE_DEV_USERNAME or KINTONE_DEV_PASSWORD is missing; skipping upload"
                );
                return false;
            }
            UploadMode::Enabled(uploader) => uploader,
        };

        let Some(file) = outcome.archive else {
            tracing::warn!(
                "No dev plugin archive was produced; configure package.command to enable uploads"
            );
            return false;
        };

        let upload = UploadRequest {
            file,
            plugin_id: self.plugin_id(),
        };
        match uploader.upload(&upload).await {
            Ok(receipt) => {
                *self.plugin_id.write() = Some(receipt.id.clone());
                tracing::info!(
                    plugin_id = %receipt.id,
                    version = %receipt.version.map(|v| v.to_string()).unwrap_or_default(),
                    "Dev plugin uploaded"
                );
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "Dev plugin upload failed");
                false
            }
        }
    }
}
