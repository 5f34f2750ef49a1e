//! Continuous deployment command.
//!
//! Deploys once at startup, then builds the release package and uploads it
//! after every quiet period until Ctrl+C. Failed deploys are logged and the
//! loop keeps watching.

use tokio::signal;
use tokio::sync::mpsc;

use crate::cli::DeployWatchArgs;
use crate::commands::build::{release_builder, release_uploader};
use crate::commands::resolve_cwd;
use crate::config::{DevMode, LoadOptions, PlugdevConfig, format_duration, process_env};
use crate::dev::{EngineEvent, SourceWatcher};
use crate::error::Result;
use crate::logger::Logging;
use crate::release::DeployWatcher;
use crate::ui;

pub async fn execute(args: DeployWatchArgs, logging: Logging) -> Result<()> {
    let flags = logging.options();
    let cwd = resolve_cwd(args.cwd.as_deref())?;
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

    let policy = args.policy(settings.schedule.coalesce_delay);
    let uploader = release_uploader(&settings, args.target)?;
    let builder = release_builder(&settings, flags.verbose, quiet)?;
    let mut deployer = DeployWatcher::new(builder, uploader, policy, settings.upload.plugin_id.clone());

    let debounce = match policy.mode {
        DevMode::Instant => "none (immediate)".to_string(),
        DevMode::Lazy => format_duration(policy.quiet_window),
    };
    tracing::info!(
        upload_target = %args.target,
        debounce = %debounce,
        src = %paths.display_relative(&paths.src_root),
        "Deploy watch started"
    );

    if deployer.deploy_now().await {
        if !quiet {
            ui::success("Initial deployment complete");
        }
    } else if !quiet {
        ui::warning("Initial deployment failed; fix the error and save to retry");
    }

    let (watcher, mut changes) =
        SourceWatcher::start(&paths.src_root, &paths.manifest, vec![paths.dist_dir.clone()])?;

    let (events, events_rx) = mpsc::channel(256);
    let forward = events.clone();
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            if forward.send(EngineEvent::Change(change)).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            let _ = events.send(EngineEvent::Shutdown).await;
        }
    });

    if !quiet {
        ui::info(&format!(
            "Watching {} (debounce: {}, target: {}); press Ctrl+C to exit",
            paths.display_relative(&paths.src_root),
            debounce,
            args.target
        ));
    }

    let stats = deployer.run(events_rx).await;
    drop(watcher);
    tracing::info!(
        deploys = stats.deploys,
        failures = stats.failures,
        changes = stats.changes,
        "Deploy watch stopped"
    );
    if !quiet {
        ui::success(&format!("Detected {} changes this session", stats.changes));
    }
    Ok(())
}
