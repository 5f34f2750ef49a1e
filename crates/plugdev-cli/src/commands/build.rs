//! Release build command.
//!
//! 1. Load configuration
//! 2. Compile every entry in one worker run into `dist/build`
//! 3. Package the plugin with live reload scripts removed
//! 4. With `--upload`, send the package to the chosen environment

use std::sync::Arc;

use crate::cli::BuildArgs;
use crate::commands::dev::manifest_check;
use crate::commands::resolve_cwd;
use crate::config::{LoadOptions, PlugdevConfig, Settings, UploadTarget, process_env};
use crate::dev::upload::UploadRequest;
use crate::dev::{CommandPackager, CommandUploader, OutputDirs, ProcessWorker, Uploader, WorkerOptions};
use crate::error::{CliError, Result};
use crate::logger::Logging;
use crate::release::{ReleaseBuilder, ReleaseTarget};
use crate::ui::{self, Spinner};

pub async fn execute(args: BuildArgs, logging: Logging) -> Result<()> {
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

    // Missing credentials fail before any build work.
    let uploader = if args.upload {
        Some(release_uploader(&settings, args.target)?)
    } else {
        None
    };
    let builder = release_builder(&settings, flags.verbose, quiet)?;

    let spinner = if quiet {
        Spinner::hidden()
    } else {
        Spinner::new("Building release...")
    };
    let release = match builder.build().await {
        Ok(release) => {
            spinner.finish(&format!("Built {} entries", release.entries));
            release
        }
        Err(err) => {
            spinner.fail("Release build failed");
            return Err(err);
        }
    };
    for warning in &release.warnings {
        tracing::warn!("{}", warning);
    }

    let Some(archive) = release.package.archive.clone() else {
        let message = format!(
            "Release manifest written to {}; set package.command to produce {}",
            paths.display_relative(&release.package.manifest_path),
            paths.display_relative(&paths.release_package)
        );
        if uploader.is_some() {
            return Err(CliError::Package(message));
        }
        if !quiet {
            ui::info(&message);
        }
        return Ok(());
    };
    tracing::info!(archive = %archive.display(), "Release package written");
    if !quiet {
        ui::success(&format!("Packaged {}", paths.display_relative(&archive)));
    }

    if let Some(uploader) = uploader {
        let receipt = uploader
            .upload(&UploadRequest {
                file: archive,
                plugin_id: release.package.plugin_id.or(settings.upload.plugin_id.clone()),
            })
            .await?;
        tracing::info!(id = %receipt.id, upload_target = %args.target, "Release uploaded");
        if !quiet {
            ui::success(&format!("Uploaded plugin {} to {}", receipt.id, args.target));
        }
    }
    Ok(())
}

/// Release builder over the configured worker, bundler and packager.
pub(crate) fn release_builder(settings: &Settings, verbose: bool, quiet: bool) -> Result<ReleaseBuilder> {
    let paths = &settings.paths;
    Ok(ReleaseBuilder::new(
        Arc::new(ProcessWorker::current_exe(settings.worker_timeout)?),
        WorkerOptions {
            plugin_root: paths.plugin_root.clone(),
            port: settings.server.port,
            bundler: settings.bundler.clone(),
            verbose,
            quiet,
        },
        OutputDirs::new(&paths.build_dir, &paths.build_staging_dir),
        Arc::new(CommandPackager::new(
            settings.package_command.clone(),
            &paths.build_dir,
        )),
        manifest_check(settings.validate)?,
        ReleaseTarget {
            manifest: paths.manifest.clone(),
            src_root: paths.src_root.clone(),
            signing_key: paths.signing_key.clone(),
            archive: paths.release_package.clone(),
        },
    ))
}

/// The upload command with the target's credentials.
pub(crate) fn release_uploader(settings: &Settings, target: UploadTarget) -> Result<Arc<dyn Uploader>> {
    let credentials = settings.upload.credentials_for(target).cloned().ok_or_else(|| {
        let prefix = target.env_prefix();
        CliError::Upload(format!(
            "Missing {prefix}_BASE_URL, {prefix}_USERNAME or {prefix}_PASSWORD; set them in .env"
        ))
    })?;
    Ok(Arc::new(
        CommandUploader::new(settings.upload.command.clone(), credentials).with_target(target),
    ))
}
