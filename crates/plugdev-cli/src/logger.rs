//! Logging for the plugdev CLI.
//!
//! Two layers sit on one registry:
//!
//! - a compact console layer on stderr behind an [`EnvFilter`]
//!   (`--verbose` for debug, `--quiet` for errors only, `RUST_LOG` otherwise)
//! - a [`DevLogLayer`] that mirrors plugdev's own events into the JSON-lines
//!   dev log once configuration has said where that log lives
//!
//! ```rust,no_run
//! use plugdev_cli::logger::{LogOptions, init_logger};
//!
//! let logging = init_logger(LogOptions::default());
//! tracing::info!("Starting dev server");
//! // later, once configuration is loaded:
//! logging.apply_quiet(true);
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::dev::devlog::{DevLogLayer, DevLogSlot};

/// Targets whose events reach the console and the dev log.
const TARGETS: &[&str] = &["plugdev", "plugdev_cli", "plugdev_graph"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub no_color: bool,
}

/// The console filter directive for the given flags.
///
/// `--verbose` and `--quiet` win over `RUST_LOG`; without either, `RUST_LOG`
/// is used when set.
pub fn console_directives(verbose: bool, quiet: bool) -> String {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn console_filter(verbose: bool, quiet: bool) -> EnvFilter {
    let directives = console_directives(verbose, quiet);
    if verbose || quiet {
        return EnvFilter::new(directives);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
}

/// What the dev log records: info and up, debug and up when verbose.
pub fn devlog_targets(verbose: bool) -> Targets {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    Targets::new().with_targets(TARGETS.iter().map(|target| (*target, level)))
}

/// Handles into the installed subscriber.
#[derive(Clone)]
pub struct Logging {
    /// Where the dev log is attached once its path is known
    pub devlog: DevLogSlot,
    console: reload::Handle<EnvFilter, Registry>,
    options: LogOptions,
}

impl Logging {
    pub fn options(&self) -> LogOptions {
        self.options
    }

    /// Apply `QUIET` from configuration. Explicit `--verbose` wins.
    pub fn apply_quiet(&self, quiet: bool) {
        if !quiet || self.options.quiet || self.options.verbose {
            return;
        }
        let filter = EnvFilter::new(console_directives(false, true));
        if let Err(err) = self.console.reload(filter) {
            tracing::debug!(error = %err, "Failed to switch console logging to quiet");
        }
    }
}

/// Install the global subscriber. Calling this twice leaves the first
/// subscriber in place.
pub fn init_logger(options: LogOptions) -> Logging {
    let slot: DevLogSlot = Arc::new(RwLock::new(None));
    let (filter, console_handle) =
        reload::Layer::new(console_filter(options.verbose, options.quiet));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(!options.no_color)
        .compact()
        .with_filter(filter);

    let devlog = DevLogLayer::new(Arc::clone(&slot)).with_filter(devlog_targets(options.verbose));

    let installed = tracing_subscriber::registry()
        .with(console)
        .with(devlog)
        .try_init();
    if installed.is_err() {
        eprintln!("Logging was already initialized; keeping the existing subscriber");
    }
    Logging {
        devlog: slot,
        console: console_handle,
        options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_console_directives() {
        assert_eq!(
            console_directives(false, false),
            "plugdev=info,plugdev_cli=info,plugdev_graph=info"
        );
        assert!(console_directives(true, false).contains("plugdev_cli=debug"));
        assert!(console_directives(false, true).contains("plugdev=error"));
    }

    #[test]
    fn test_devlog_targets() {
        let normal = devlog_targets(false);
        assert!(normal.would_enable("plugdev_cli::dev::engine", &Level::INFO));
        assert!(!normal.would_enable("plugdev_cli::dev::engine", &Level::DEBUG));
        assert!(!normal.would_enable("hyper::proto", &Level::ERROR));

        let verbose = devlog_targets(true);
        assert!(verbose.would_enable("plugdev_graph", &Level::DEBUG));
    }
}
