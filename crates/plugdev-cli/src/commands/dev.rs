//! Dev server command.
//!
//! 1. Load configuration and attach the dev log
//! 2. Load and validate the manifest (strict errors are fatal here)
//! 3. Bind the server, with HTTPS when a certificate is available
//! 4. Initial full build
//! 5. Serve, package the dev plugin, maybe upload it
//! 6. Hand watcher, key and signal events to the engine until shutdown

use std::sync::Arc;

use tokio::signal;
use tokio::sync::mpsc;

use crate::cli::DevArgs;
use crate::commands::resolve_cwd;
use crate::config::{LoadOptions, PlugdevConfig, Settings, ValidateMode, process_env};
use crate::dev::keys::{self, KeyCommand};
use crate::dev::{
    AppState, CommandPackager, CommandUploader, DevEngine, DevLog, DevLogTarget, DevPublisher,
    DevServer, EngineEvent, LiveHub, ManifestCheck, OutputDirs, PemFileProvider, PluginManifest,
    ProcessWorker, PublishTarget, SourceWatcher, StaticDirs, UploadMode, WorkerOptions,
    bind_with_fallback, router,
};
use crate::dev::tls::{CertificateProvider, TlsKeypair};
use crate::error::{CliError, Result};
use crate::logger::Logging;
use crate::manifest::{ManifestValidator, SchemaValidator};
use crate::ui::{self, DevBanner, Spinner};

pub async fn execute(args: DevArgs, logging: Logging) -> Result<()> {
    let flags = logging.options();
    let cwd = resolve_cwd(args.cwd.as_deref())?;
    if let Some(window) = args.ignored_quiet_window() {
        tracing::warn!("Quiet window {} ignored: it only applies with --mode lazy", window);
    }

    let loaded = PlugdevConfig::load(&LoadOptions {
        cwd,
        config_path: args.config.clone(),
        overrides: args.overrides(flags.quiet),
        env: process_env(),
    })?;
    let settings = loaded.settings;
    let paths = settings.paths.clone();
    logging.apply_quiet(settings.log.quiet);
    let quiet = flags.quiet || (settings.log.quiet && !flags.verbose);

    if let Some(file) = &loaded.config_file {
        tracing::debug!(config = %file.display(), "Configuration loaded");
    }

    let devlog = attach_devlog(&settings, &logging);

    // Manifest problems are fatal before the server starts.
    let check = manifest_check(settings.validate)?;
    let plugin = PluginManifest::load(&paths.manifest, &paths.src_root, &check)?;
    for warning in &plugin.warnings {
        tracing::warn!("Manifest: {}", warning);
    }
    let manifest = plugin.manifest.clone();
    let entry_count = plugin.entries.len();
    tracing::info!(
        entries = entry_count,
        manifest = %paths.display_relative(&paths.manifest),
        "Manifest loaded"
    );

    let bound = bind_with_fallback(&settings.server.host, settings.server.port)?;
    if bound.port_changed() {
        tracing::warn!(
            requested = bound.requested_port,
            actual = bound.addr.port(),
            "Port {} is in use, using {}",
            bound.requested_port,
            bound.addr.port()
        );
    }
    let tls = load_certificate(&settings)?;

    let hub = LiveHub::new();
    let output = OutputDirs::new(&paths.live_dir, &paths.staging_dir);
    let worker = ProcessWorker::current_exe(settings.worker_timeout)?;
    let options = WorkerOptions {
        plugin_root: paths.plugin_root.clone(),
        port: bound.addr.port(),
        bundler: settings.bundler.clone(),
        verbose: flags.verbose,
        quiet,
    };

    let mut engine = DevEngine::new(
        settings.schedule,
        plugin,
        &paths.src_root,
        Arc::new(worker),
        options,
        output,
        hub.clone(),
    )
    .with_manifest_check(check);

    let spinner = if quiet {
        Spinner::hidden()
    } else {
        Spinner::new(&format!("Building {} entries...", entry_count))
    };
    if engine.initial_build().await {
        spinner.finish("Initial build done");
    } else {
        spinner.fail("Initial build failed; fix the error and save to retry");
    }

    let state = AppState::new(hub, devlog);
    let plugin_id = Arc::clone(&state.plugin_id);
    let statics = StaticDirs {
        live: paths.live_dir.clone(),
        source_fallback: settings
            .server
            .serve_source_fallback
            .then(|| paths.src_root.clone()),
    };
    let server = DevServer::new(bound, tls, router(state, &statics));
    let origin = server.origin();
    let mut server_task = tokio::spawn(server.start());

    let publisher = Arc::new(DevPublisher::new(
        Arc::new(CommandPackager::new(
            settings.package_command.clone(),
            &paths.package_dir,
        )),
        upload_mode(&settings),
        PublishTarget {
            manifest_dir: paths
                .manifest
                .parent()
                .map(|dir| dir.to_path_buf())
                .unwrap_or_else(|| paths.src_root.clone()),
            signing_key: paths.signing_key.clone(),
            archive: paths.dev_package.clone(),
            base_url: format!("{origin}/__static/js"),
            live_client: settings
                .server
                .inject_client
                .then(|| format!("{origin}/__live/client.js")),
        },
        plugin_id,
    ));
    engine = engine.with_publisher(Arc::clone(&publisher));
    tokio::spawn(async move {
        publisher.publish(&manifest).await;
    });

    let (watcher, mut changes) =
        SourceWatcher::start(&paths.src_root, &paths.manifest, vec![paths.dist_dir.clone()])?;
    tracing::debug!(root = %watcher.root().display(), "Watching for changes");

    let (events, events_rx) = mpsc::channel(256);
    let forward = events.clone();
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if forward.send(EngineEvent::Change(change)).await.is_err() {
                break;
            }
        }
    });

    let key_rx = keys::listen();
    let interactive = key_rx.is_some();
    if let Some(mut key_rx) = key_rx {
        let forward = events.clone();
        tokio::spawn(async move {
            while let Some(command) = key_rx.recv().await {
                let event = match command {
                    KeyCommand::Rebuild => EngineEvent::Rebuild,
                    KeyCommand::Quit => EngineEvent::Shutdown,
                };
                if forward.send(event).await.is_err() {
                    break;
                }
            }
        });
    }

    let forward = events.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            let _ = forward.send(EngineEvent::Shutdown).await;
        }
    });

    if !quiet {
        ui::print_dev_banner(&DevBanner {
            origin: origin.clone(),
            mode: settings.schedule.mode,
            quiet_window: settings.schedule.quiet_window,
            entries: entry_count,
            log_file: settings
                .log
                .enabled()
                .then(|| paths.display_relative(&settings.log.file)),
            interactive,
        });
    }
    tracing::info!(
        origin = %origin,
        mode = %settings.schedule.mode,
        "Dev server listening on {}",
        origin
    );

    let mut engine_task = tokio::spawn(engine.run(events_rx));
    let stats = tokio::select! {
        stats = &mut engine_task => stats
            .map_err(|e| CliError::Server(format!("Rebuild loop stopped: {e}")))?,
        served = &mut server_task => {
            let _ = events.send(EngineEvent::Shutdown).await;
            let _ = engine_task.await;
            return match served {
                Ok(Ok(())) => Err(CliError::Server("Server stopped unexpectedly".to_string())),
                Ok(Err(err)) => Err(err),
                Err(err) => Err(CliError::Server(format!("Server task failed: {err}"))),
            };
        }
    };

    server_task.abort();
    drop(watcher);
    tracing::info!(
        builds = stats.builds,
        failures = stats.failures,
        skipped = stats.skipped,
        "Dev server stopped"
    );
    if !quiet {
        ui::success("Dev server stopped");
    }
    Ok(())
}

/// Open the dev log and hand it to the tracing layer. A log that cannot be
/// opened is reported and treated as disabled.
fn attach_devlog(settings: &Settings, logging: &Logging) -> DevLogTarget {
    if let Some(reason) = &settings.log.disabled_reason {
        tracing::info!("{}", reason);
        return DevLogTarget::Disabled(reason.clone());
    }
    match DevLog::open(&settings.log.file) {
        Ok(log) => {
            let log = Arc::new(log);
            *logging.devlog.write() = Some(Arc::clone(&log));
            tracing::debug!(path = %log.path().display(), "Dev log attached");
            DevLogTarget::Enabled(log)
        }
        Err(err) => {
            let reason = format!(
                "Failed to open dev log {}: {}",
                settings.log.file.display(),
                err
            );
            tracing::warn!("{}", reason);
            DevLogTarget::Disabled(reason)
        }
    }
}

pub(crate) fn manifest_check(mode: ValidateMode) -> Result<ManifestCheck> {
    let validator: Option<Arc<dyn ManifestValidator>> = match mode {
        ValidateMode::Off => None,
        _ => Some(Arc::new(SchemaValidator::new()?)),
    };
    Ok(ManifestCheck { validator, mode })
}

fn load_certificate(settings: &Settings) -> Result<Option<TlsKeypair>> {
    let domains = settings.server.certificate_domains();
    let keypair = match PemFileProvider::from_section(&settings.tls) {
        Some(provider) => provider.certificate_for(&domains)?,
        None => None,
    };
    if keypair.is_none() {
        tracing::warn!(
            "No TLS certificate found for {}; serving over plain HTTP. Set tls.cert and tls.key (or tls.dir) to enable HTTPS",
            domains.join(", ")
        );
    }
    Ok(keypair)
}

fn upload_mode(settings: &Settings) -> UploadMode {
    if !settings.upload.enabled {
        return UploadMode::Disabled;
    }
    match &settings.upload.credentials {
        Some(credentials) => UploadMode::Enabled(Arc::new(CommandUploader::new(
            settings.upload.command.clone(),
            credentials.clone(),
        ))),
        None => UploadMode::MissingCredentials,
    }
}
