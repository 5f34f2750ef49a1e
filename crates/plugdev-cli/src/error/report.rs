//! Miette report conversion for CLI errors.

use crate::error::{BuildError, CliError, ManifestError};
use miette::Report;

/// Convert CliError to miette Report
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Config(e) => miette::miette!("Configuration error: {}", e),
        CliError::Manifest(e) => manifest_error_to_miette(e),
        CliError::Build(e) => build_error_to_miette(e),
        _ => miette::miette!("{}", err),
    }
}

fn manifest_error_to_miette(err: ManifestError) -> Report {
    match err {
        ManifestError::Invalid { errors } => miette::miette!(
            help = "Fix the errors above or set MANIFEST_VALIDATE=warn",
            "Manifest validation failed:\n{}",
            errors
        ),
        other => miette::miette!("{}", other),
    }
}

fn build_error_to_miette(err: BuildError) -> Report {
    match err {
        BuildError::TimedOut(after) => miette::miette!(
            help = "Raise dev.worker_timeout or set it to 0 to disable the limit",
            "Build worker timed out after {}s",
            after.as_secs()
        ),
        other => miette::miette!("Build failed: {}", other),
    }
}
