//! The dev build loop.
//!
//! One task owns the scheduler, the dependency graph and the entry list.
//! File changes and key commands come in over a channel; builds run on a
//! spawned task so that events keep being accepted (and accumulated) while
//! the worker compiles. At most one build is in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use plugdev_graph::DependencyGraph;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::config::{BundlerSection, DevMode, ValidateMode, format_duration};
use crate::dev::hub::LiveHub;
use crate::dev::output::OutputDirs;
use crate::dev::plan::{BuildPlan, FullReason, plan_build};
use crate::dev::publish::DevPublisher;
use crate::dev::scheduler::{ChangeBatch, ChangeScheduler, SchedulePolicy};
use crate::dev::watcher::{ChangeTarget, WatchEvent};
use crate::dev::worker::{BuildOutcome, BuildWorker, BuildWorkerRequest};
use crate::error::{BuildError, Result};
use crate::manifest::{EntryInfo, Manifest, ManifestValidator};
use crate::ui::format_elapsed;

const LAZY_NOTICE_INTERVAL: Duration = Duration::from_secs(1);

/// Input to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Change(WatchEvent),
    /// Manual trigger
    Rebuild,
    Shutdown,
}

/// The manifest and the entries derived from it.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub entries: Vec<EntryInfo>,
    pub warnings: Vec<String>,
}

/// How manifests are checked when (re)loaded.
#[derive(Clone)]
pub struct ManifestCheck {
    pub validator: Option<Arc<dyn ManifestValidator>>,
    pub mode: ValidateMode,
}

impl ManifestCheck {
    pub fn off() -> Self {
        Self {
            validator: None,
            mode: ValidateMode::Off,
        }
    }
}

impl PluginManifest {
    /// Read, validate and extract entries. Strict validation errors, parse
    /// errors and entry errors all fail the load.
    pub fn load(path: &Path, src_root: &Path, check: &ManifestCheck) -> Result<Self> {
        let raw = Manifest::read_raw(path)?;
        let mut warnings = Vec::new();
        if let Some(validator) = check.validator.as_deref() {
            if check.mode != ValidateMode::Off {
                let dir = path.parent().unwrap_or(src_root);
                let report = validator.validate(&raw, dir).enforce(check.mode)?;
                warnings = report.warnings;
            }
        }
        let manifest = Manifest::from_value(path, &raw)?;
        let entries = manifest.entries(src_root, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            entries,
            warnings,
        })
    }

    pub fn version(&self) -> String {
        self.manifest.version.to_string()
    }
}

/// Request fields that do not change between batches.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub plugin_root: PathBuf,
    pub port: u16,
    pub bundler: BundlerSection,
    pub verbose: bool,
    pub quiet: bool,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub builds: usize,
    pub failures: usize,
    /// Batches whose files fed no entry
    pub skipped: usize,
    /// Manifest changes rejected by validation or entry extraction
    pub rejected_manifests: usize,
}

struct Finished {
    batch: ChangeBatch,
    plan: BuildPlan,
    started: Instant,
    result: std::result::Result<BuildOutcome, BuildError>,
}

pub struct DevEngine {
    scheduler: ChangeScheduler,
    graph: DependencyGraph,
    plugin: PluginManifest,
    src_root: PathBuf,
    check: ManifestCheck,
    worker: Arc<dyn BuildWorker>,
    options: WorkerOptions,
    output: OutputDirs,
    hub: LiveHub,
    publisher: Option<Arc<DevPublisher>>,
    in_flight: Option<JoinHandle<Finished>>,
    last_lazy_notice: Option<Instant>,
    stats: EngineStats,
}

impl DevEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: SchedulePolicy,
        plugin: PluginManifest,
        src_root: impl Into<PathBuf>,
        worker: Arc<dyn BuildWorker>,
        options: WorkerOptions,
        output: OutputDirs,
        hub: LiveHub,
    ) -> Self {
        let src_root = src_root.into();
        Self {
            scheduler: ChangeScheduler::new(policy),
            graph: DependencyGraph::new(&src_root),
            plugin,
            src_root,
            check: ManifestCheck::off(),
            worker,
            options,
            output,
            hub,
            publisher: None,
            in_flight: None,
            last_lazy_notice: None,
            stats: EngineStats::default(),
        }
    }

    /// Validation applied when the manifest changes.
    pub fn with_manifest_check(mut self, check: ManifestCheck) -> Self {
        self.check = check;
        self
    }

    /// Repackage (and maybe upload) after manifest-change rebuilds.
    pub fn with_publisher(mut self, publisher: Arc<DevPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.plugin.entries
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Full build before the server starts. A failure is logged and leaves
    /// the graph empty, so the next change rebuilds everything.
    pub async fn initial_build(&mut self) -> bool {
        let batch = ChangeBatch::default();
        let plan = BuildPlan::Full(FullReason::Initial);
        let handle = self.spawn_build(batch, plan);
        match handle.await {
            Ok(finished) => self.apply(finished),
            Err(err) => {
                tracing::error!(error = %err, "Initial build task failed");
                self.stats.failures += 1;
                false
            }
        }
    }

    /// Run until [`EngineEvent::Shutdown`] or the event channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) -> EngineStats {
        loop {
            let wake = self.scheduler.next_wake();
            tokio::select! {
                event = events.recv() => match event {
                    Some(EngineEvent::Change(change)) => self.on_change(change),
                    Some(EngineEvent::Rebuild) => {
                        tracing::info!("Manual rebuild requested");
                        self.scheduler.on_manual_trigger(Instant::now());
                    }
                    Some(EngineEvent::Shutdown) | None => break,
                },
                _ = sleep_until(wake) => {
                    if let Some(batch) = self.scheduler.on_timer(Instant::now()) {
                        self.start_batch(batch);
                    }
                }
                finished = join(&mut self.in_flight) => {
                    self.in_flight = None;
                    match finished {
                        Ok(finished) => {
                            self.apply(finished);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "Build task failed");
                            self.stats.failures += 1;
                        }
                    }
                    self.scheduler.on_build_finished(Instant::now());
                }
            }
        }

        if let Some(handle) = self.in_flight.take() {
            handle.abort();
            self.output.discard();
        }
        self.stats
    }

    fn on_change(&mut self, change: WatchEvent) {
        let now = Instant::now();
        match change.target {
            ChangeTarget::Manifest => {
                tracing::info!("Manifest changed, rebuilding everything");
                self.scheduler.on_manifest_change(now);
            }
            ChangeTarget::Source(file) => {
                tracing::debug!(file = %file, kind = ?change.kind, "Source change");
                if self.scheduler.policy().mode == DevMode::Lazy {
                    let due = self
                        .last_lazy_notice
                        .is_none_or(|at| now.duration_since(at) > LAZY_NOTICE_INTERVAL);
                    if due {
                        tracing::info!(
                            file = %file,
                            "Change detected, rebuilding after {} of quiet",
                            format_duration(self.scheduler.policy().quiet_window)
                        );
                        self.last_lazy_notice = Some(now);
                    }
                }
                self.scheduler.on_source_change(file, now);
            }
        }
    }

    fn start_batch(&mut self, batch: ChangeBatch) {
        if batch.manifest_changed {
            match PluginManifest::load(&self.plugin.path, &self.src_root, &self.check) {
                Ok(plugin) => {
                    for warning in &plugin.warnings {
                        tracing::warn!("Manifest: {}", warning);
                    }
                    tracing::info!(entries = plugin.entries.len(), "Manifest reloaded");
                    self.plugin = plugin;
                    self.graph.clear();
                }
                Err(err) => {
                    tracing::error!(error = %err, "Manifest rejected; still serving the previous build");
                    self.stats.rejected_manifests += 1;
                    let now = Instant::now();
                    self.scheduler.on_build_finished(now);
                    if !batch.files.is_empty() {
                        tracing::debug!(files = ?batch.files, "Requeueing source changes");
                    }
                    self.scheduler.requeue(batch, now);
                    return;
                }
            }
        }

        let plan = plan_build(&batch, &self.graph, &self.plugin.entries);
        if plan == BuildPlan::Nothing {
            tracing::debug!(files = ?batch.files, "Changes affect no entry");
            self.stats.skipped += 1;
            self.scheduler.on_build_finished(Instant::now());
            return;
        }
        self.in_flight = Some(self.spawn_build(batch, plan));
    }

    fn spawn_build(&self, batch: ChangeBatch, plan: BuildPlan) -> JoinHandle<Finished> {
        let indices = plan.indices(&self.plugin.entries);
        let names: Vec<&str> = indices
            .iter()
            .filter_map(|i| self.plugin.entries.get(*i))
            .map(|e| e.relative_path.as_str())
            .collect();
        match &plan {
            BuildPlan::Full(reason) => {
                tracing::info!(entries = names.len(), "Rebuilding all entries ({})", reason)
            }
            _ => tracing::info!("Rebuilding {}", names.join(", ")),
        }

        let full = plan.is_full();
        let request = BuildWorkerRequest {
            plugin_root: self.options.plugin_root.clone(),
            out_dir: self.output.staging.clone(),
            entries: self.plugin.entries.clone(),
            indices,
            empty_out_dir: full,
            version: self.plugin.version(),
            port: self.options.port,
            bundler: self.options.bundler.clone(),
            verbose: self.options.verbose,
            quiet: self.options.quiet,
        };
        let worker = Arc::clone(&self.worker);
        let output = self.output.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let result = build_into_staging(worker.as_ref(), &output, request, full).await;
            Finished {
                batch,
                plan,
                started,
                result,
            }
        })
    }

    /// Apply a finished build. Returns whether it succeeded.
    fn apply(&mut self, finished: Finished) -> bool {
        let Finished {
            batch,
            plan,
            started,
            result,
        } = finished;
        let elapsed = started.elapsed();

        match result {
            Ok(outcome) => {
                self.stats.builds += 1;
                for deps in &outcome.dependencies {
                    let summary = self.graph.update(&deps.entry, &deps.module_paths);
                    tracing::debug!(
                        entry = %deps.entry,
                        tracked = summary.tracked,
                        skipped = summary.skipped,
                        "Dependency graph updated"
                    );
                    for outside in &summary.outside_root {
                        tracing::debug!(entry = %deps.entry, path = %outside, "Module outside the source root is not tracked");
                    }
                }
                for warning in &outcome.warnings {
                    tracing::warn!("{}", warning);
                }

                if batch.manifest_changed {
                    if let Some(publisher) = &self.publisher {
                        let publisher = Arc::clone(publisher);
                        let manifest = self.plugin.manifest.clone();
                        tokio::spawn(async move {
                            publisher.publish(&manifest).await;
                        });
                    }
                }

                let ts = self.hub.advance();
                let clients = self.hub.notify();
                tracing::info!(
                    ts,
                    clients,
                    full = plan.is_full(),
                    "Rebuilt in {}",
                    format_elapsed(elapsed)
                );
                true
            }
            Err(err) => {
                self.stats.failures += 1;
                tracing::error!(
                    files = ?batch.files,
                    "Rebuild failed after {}; still serving the previous build\n{}",
                    format_elapsed(elapsed),
                    err
                );
                false
            }
        }
    }
}

/// Build into a fresh staging directory and commit only on full success.
pub async fn build_into_staging(
    worker: &dyn BuildWorker,
    output: &OutputDirs,
    request: BuildWorkerRequest,
    full: bool,
) -> std::result::Result<BuildOutcome, BuildError> {
    output.prepare_staging_async().await?;
    let outcome = match worker.build(request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            output.discard_async().await;
            return Err(err);
        }
    };
    match output.commit_async(full).await {
        Ok(published) => {
            tracing::debug!(files = published, full, "Output committed");
            Ok(outcome)
        }
        Err(err) => {
            output.discard_async().await;
            Err(err)
        }
    }
}

pub(crate) async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn join<T>(handle: &mut Option<JoinHandle<T>>) -> std::result::Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
