//! Command-line interface definition.
//!
//! - `plugdev dev` - dev server with incremental rebuilds and live reload
//! - `plugdev validate` - manifest validation report
//! - `plugdev build` - release build and package
//! - `plugdev deploy-watch` - build and upload after every change
//! - `plugdev build-worker` - hidden; one isolated build per invocation

mod commands;
mod tests;
mod validation;

use clap::Parser;

pub use commands::{BuildArgs, BuildWorkerArgs, Command, DeployWatchArgs, DevArgs, ValidateArgs};
pub use validation::{parse_port, parse_window};

/// plugdev - incremental dev server for low-code platform plugins
#[derive(Parser, Debug)]
#[command(
    name = "plugdev",
    version,
    about = "Incremental dev server with live reload for platform plugins",
    long_about = "plugdev watches a plugin's sources, rebuilds only the manifest entries a change\n\
                  affects, serves the output to the browser and reloads pages once a build lands."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    ///
    /// Shows per-file change tracking and dependency-graph decisions.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}
