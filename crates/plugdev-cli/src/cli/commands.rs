use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::cli::validation::{parse_port, parse_window};
use crate::config::defaults::DEFAULT_DEPLOY_DEBOUNCE;
use crate::config::{ConfigOverrides, DevMode, UploadTarget, ValidateMode, parse_duration};
use crate::dev::SchedulePolicy;

/// Available plugdev subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the dev server
    ///
    /// Runs an initial build, watches the plugin sources, rebuilds the
    /// affected entries and notifies connected pages.
    Dev(DevArgs),

    /// Validate the plugin manifest
    ///
    /// Prints every error and warning. Exits non-zero when errors remain
    /// under the chosen mode.
    Validate(ValidateArgs),

    /// Build the release package
    ///
    /// Compiles every entry into `dist/build` and packages the plugin with
    /// live reload scripts removed.
    Build(BuildArgs),

    /// Build and upload after every change
    ///
    /// For devices that cannot reach the dev server. Waits for the sources
    /// to go quiet, then builds the release package and uploads it.
    DeployWatch(DeployWatchArgs),

    /// Isolated build worker (internal)
    ///
    /// Reads one JSON request on stdin and prints one JSON reply on stdout.
    #[command(hide = true)]
    BuildWorker(BuildWorkerArgs),
}

/// Arguments for the dev command
#[derive(Args, Debug, Default)]
pub struct DevArgs {
    /// Rebuild policy
    ///
    /// - instant: rebuild shortly after each burst of changes
    /// - lazy: rebuild once the sources have been quiet for the window
    #[arg(long, value_enum, value_name = "MODE")]
    pub mode: Option<DevMode>,

    /// Quiet window for lazy mode, e.g. `plugdev dev --mode lazy 10m`
    #[arg(value_name = "QUIET_WINDOW", value_parser = parse_window)]
    pub quiet_window: Option<String>,

    /// Quiet window for lazy mode
    #[arg(long, value_name = "DURATION", value_parser = parse_window)]
    pub lazy_window: Option<String>,

    /// Port to listen on; the next free port is used when it is taken
    #[arg(short, long, value_name = "PORT", value_parser = parse_port)]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Upload the dev plugin after packaging
    #[arg(long, conflicts_with = "no_upload")]
    pub upload: bool,

    /// Never upload the dev plugin
    #[arg(long)]
    pub no_upload: bool,

    /// Directory to start the repository root search from
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file instead of `<repo>/plugdev.toml`
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl DevArgs {
    /// Overrides for configuration loading. A positional quiet window given
    /// together with `--mode instant` is dropped; see
    /// [`Self::ignored_quiet_window`].
    pub fn overrides(&self, quiet: bool) -> ConfigOverrides {
        let positional = self
            .quiet_window
            .clone()
            .filter(|_| self.mode != Some(DevMode::Instant));
        ConfigOverrides {
            mode: self.mode,
            lazy_window: self.lazy_window.clone().or(positional),
            host: self.host.clone(),
            port: self.port,
            upload: match (self.upload, self.no_upload) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            validate: None,
            quiet: quiet.then_some(true),
        }
    }

    pub fn ignored_quiet_window(&self) -> Option<&str> {
        match self.mode {
            Some(DevMode::Instant) => self.quiet_window.as_deref(),
            _ => None,
        }
    }
}

/// Arguments for the validate command
#[derive(Args, Debug, Default)]
pub struct ValidateArgs {
    /// How errors are treated
    #[arg(long, value_enum, value_name = "MODE")]
    pub mode: Option<ValidateMode>,

    /// Directory to start the repository root search from
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file instead of `<repo>/plugdev.toml`
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ValidateArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            validate: self.mode,
            ..Default::default()
        }
    }
}

/// Arguments for the build command
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Upload the package once it is built
    #[arg(long)]
    pub upload: bool,

    /// Environment to upload to; selects `KINTONE_DEV_*` or `KINTONE_PROD_*`
    #[arg(long, value_enum, value_name = "TARGET", default_value_t = UploadTarget::Dev)]
    pub target: UploadTarget,

    /// Directory to start the repository root search from
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file instead of `<repo>/plugdev.toml`
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl BuildArgs {
    pub fn overrides(&self, quiet: bool) -> ConfigOverrides {
        ConfigOverrides {
            quiet: quiet.then_some(true),
            ..Default::default()
        }
    }
}

/// Arguments for the deploy-watch command
#[derive(Args, Debug, Default)]
pub struct DeployWatchArgs {
    /// Quiet time before deploying, e.g. `plugdev deploy-watch 10s`
    #[arg(value_name = "DEBOUNCE", value_parser = parse_window)]
    pub debounce: Option<String>,

    /// Deploy right after each change
    #[arg(long, conflicts_with = "debounce")]
    pub immediate: bool,

    /// Environment to upload to; selects `KINTONE_DEV_*` or `KINTONE_PROD_*`
    #[arg(long, value_enum, value_name = "TARGET", default_value_t = UploadTarget::Dev)]
    pub target: UploadTarget,

    /// Directory to start the repository root search from
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file instead of `<repo>/plugdev.toml`
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl DeployWatchArgs {
    pub fn overrides(&self, quiet: bool) -> ConfigOverrides {
        ConfigOverrides {
            quiet: quiet.then_some(true),
            ..Default::default()
        }
    }

    /// `--immediate` deploys on the next tick; otherwise deploys wait for
    /// the debounce (default 5s) of quiet.
    pub fn policy(&self, coalesce_delay: Duration) -> SchedulePolicy {
        if self.immediate {
            return SchedulePolicy::new(DevMode::Instant, Duration::ZERO, Duration::ZERO);
        }
        let debounce = self
            .debounce
            .as_deref()
            .and_then(parse_duration)
            .or_else(|| parse_duration(DEFAULT_DEPLOY_DEBOUNCE))
            .unwrap_or(Duration::from_secs(5));
        SchedulePolicy::new(DevMode::Lazy, debounce, coalesce_delay)
    }
}

/// Arguments for the build-worker command
#[derive(Args, Debug, Default)]
pub struct BuildWorkerArgs {
    /// Read the request from this file instead of stdin
    #[arg(long, value_name = "FILE", hide = true)]
    pub request: Option<PathBuf>,
}
