//! Release builds and continuous deployment.
//!
//! A release build compiles every entry in one worker run, commits the result
//! to the build directory, and packages the plugin with a manifest that points
//! at the compiled files and carries no live reload script.
//!
//! [`DeployWatcher`] repeats that after source changes and uploads each
//! package, for devices that cannot reach the dev server. Changes arriving
//! during a deploy are held by the scheduler and start one more deploy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{DevMode, format_duration};
use crate::dev::engine::{
    EngineEvent, ManifestCheck, PluginManifest, WorkerOptions, build_into_staging, join,
    sleep_until,
};
use crate::dev::output::OutputDirs;
use crate::dev::package::{DevPackager, PackageOutcome, PackageRequest};
use crate::dev::scheduler::{ChangeScheduler, SchedulePolicy};
use crate::dev::upload::{UploadReceipt, UploadRequest, Uploader};
use crate::dev::watcher::{ChangeTarget, WatchEvent};
use crate::dev::worker::{BuildWorker, BuildWorkerRequest};
use crate::error::{CliError, Result};
use crate::ui::format_elapsed;

/// Release manifests reference `js/<stem>.js` next to the manifest.
const RELEASE_SCRIPT_DIR: &str = "js";

/// Where a release build reads from and packages to.
#[derive(Debug, Clone)]
pub struct ReleaseTarget {
    pub manifest: PathBuf,
    pub src_root: PathBuf,
    pub signing_key: PathBuf,
    pub archive: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub entries: usize,
    pub warnings: Vec<String>,
    pub package: PackageOutcome,
}

pub struct ReleaseBuilder {
    worker: Arc<dyn BuildWorker>,
    options: WorkerOptions,
    output: OutputDirs,
    packager: Arc<dyn DevPackager>,
    check: ManifestCheck,
    target: ReleaseTarget,
}

impl ReleaseBuilder {
    pub fn new(
        worker: Arc<dyn BuildWorker>,
        options: WorkerOptions,
        output: OutputDirs,
        packager: Arc<dyn DevPackager>,
        check: ManifestCheck,
        target: ReleaseTarget,
    ) -> Self {
        Self {
            worker,
            options,
            output,
            packager,
            check,
            target,
        }
    }

    /// Reload the manifest, compile every entry and package the plugin.
    /// The build directory is only replaced when every entry compiled.
    pub async fn build(&self) -> Result<ReleaseOutcome> {
        let plugin = PluginManifest::load(&self.target.manifest, &self.target.src_root, &self.check)?;
        for warning in &plugin.warnings {
            tracing::warn!("Manifest: {}", warning);
        }

        let manifest = plugin.manifest.without_dev_scripts();
        let entries = manifest.entries(&self.target.src_root, &plugin.path)?;
        let request = BuildWorkerRequest {
            plugin_root: self.options.plugin_root.clone(),
            out_dir: self.output.staging.clone(),
            indices: entries.iter().map(|e| e.index).collect(),
            entries,
            empty_out_dir: true,
            version: plugin.version(),
            port: self.options.port,
            bundler: self.options.bundler.clone(),
            verbose: self.options.verbose,
            quiet: self.options.quiet,
        };
        let count = request.indices.len();
        tracing::debug!(entries = count, out = %self.output.live.display(), "Release build");

        let built = build_into_staging(self.worker.as_ref(), &self.output, request, true).await?;
        let package = self
            .packager
            .package(&PackageRequest {
                manifest,
                manifest_dir: plugin
                    .path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.target.src_root.clone()),
                signing_key: self.target.signing_key.clone(),
                base_url: RELEASE_SCRIPT_DIR.to_string(),
                live_client: None,
                output: self.target.archive.clone(),
            })
            .await?;

        Ok(ReleaseOutcome {
            entries: count,
            warnings: built.warnings,
            package,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployStats {
    pub deploys: usize,
    pub failures: usize,
    /// Watcher events seen, manifest included
    pub changes: usize,
}

/// Build, package and upload after every quiet period.
pub struct DeployWatcher {
    builder: Arc<ReleaseBuilder>,
    uploader: Arc<dyn Uploader>,
    scheduler: ChangeScheduler,
    /// Sent with each upload until a receipt reports the real id
    plugin_id: Option<String>,
    stats: DeployStats,
    in_flight: Option<JoinHandle<Result<UploadReceipt>>>,
}

impl DeployWatcher {
    pub fn new(
        builder: ReleaseBuilder,
        uploader: Arc<dyn Uploader>,
        policy: SchedulePolicy,
        plugin_id: Option<String>,
    ) -> Self {
        Self {
            builder: Arc::new(builder),
            uploader,
            scheduler: ChangeScheduler::new(policy),
            plugin_id,
            stats: DeployStats::default(),
            in_flight: None,
        }
    }

    pub fn stats(&self) -> &DeployStats {
        &self.stats
    }

    /// One deploy, awaited. Returns whether it uploaded.
    pub async fn deploy_now(&mut self) -> bool {
        let result = deploy(
            Arc::clone(&self.builder),
            Arc::clone(&self.uploader),
            self.plugin_id.clone(),
        )
        .await;
        self.record(result)
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) -> DeployStats {
        loop {
            let wake = self.scheduler.next_wake();
            tokio::select! {
                event = events.recv() => match event {
                    Some(EngineEvent::Change(change)) => self.on_change(change),
                    Some(EngineEvent::Rebuild) => {
                        tracing::info!("Manual deploy requested");
                        self.scheduler.on_manual_trigger(Instant::now());
                    }
                    Some(EngineEvent::Shutdown) | None => break,
                },
                _ = sleep_until(wake) => {
                    if let Some(batch) = self.scheduler.on_timer(Instant::now()) {
                        tracing::debug!(files = ?batch.files, manifest = batch.manifest_changed, "Deploying");
                        self.in_flight = Some(tokio::spawn(deploy(
                            Arc::clone(&self.builder),
                            Arc::clone(&self.uploader),
                            self.plugin_id.clone(),
                        )));
                    }
                }
                finished = join(&mut self.in_flight) => {
                    self.in_flight = None;
                    let result = finished
                        .map_err(|e| CliError::Custom(format!("Deploy task failed: {e}")))
                        .and_then(|result| result);
                    self.record(result);
                    self.scheduler.on_build_finished(Instant::now());
                }
            }
        }

        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            tracing::debug!("Deploy in progress abandoned at shutdown");
        }
        self.stats
    }

    fn on_change(&mut self, change: WatchEvent) {
        self.stats.changes += 1;
        let now = Instant::now();
        let policy = self.scheduler.policy();
        let when = match policy.mode {
            DevMode::Lazy => format!(", deploying after {} of quiet", format_duration(policy.quiet_window)),
            DevMode::Instant => String::new(),
        };
        match change.target {
            ChangeTarget::Manifest => {
                tracing::info!("Manifest changed{}", when);
                self.scheduler.on_manifest_change(now);
            }
            ChangeTarget::Source(file) => {
                tracing::info!(kind = ?change.kind, "Change detected: {}{}", file, when);
                self.scheduler.on_source_change(file, now);
            }
        }
    }

    fn record(&mut self, result: Result<UploadReceipt>) -> bool {
        match result {
            Ok(receipt) => {
                self.stats.deploys += 1;
                match &receipt.version {
                    Some(version) => tracing::info!(id = %receipt.id, "Deployed version {}", version),
                    None => tracing::info!(id = %receipt.id, "Deployed"),
                }
                self.plugin_id = Some(receipt.id);
                true
            }
            Err(err) => {
                self.stats.failures += 1;
                tracing::error!("Deploy failed; waiting for the next change\n{}", err);
                false
            }
        }
    }
}

async fn deploy(
    builder: Arc<ReleaseBuilder>,
    uploader: Arc<dyn Uploader>,
    plugin_id: Option<String>,
) -> Result<UploadReceipt> {
    let started = Instant::now();
    let release = builder.build().await?;
    let file = release.package.archive.clone().ok_or_else(|| {
        CliError::Package(format!(
            "No archive at {}; configure package.command to write {{output}}",
            builder.target.archive.display()
        ))
    })?;
    tracing::info!(
        entries = release.entries,
        "Built in {}, uploading {}",
        format_elapsed(started.elapsed()),
        file.display()
    );
    uploader
        .upload(&UploadRequest {
            file,
            plugin_id: release.package.plugin_id.or(plugin_id),
        })
        .await
}
