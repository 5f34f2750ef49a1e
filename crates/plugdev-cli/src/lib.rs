//! plugdev - incremental dev server with live reload for platform plugins.
//!
//! A plugin declares its scripts in a manifest. plugdev compiles each script
//! into its own bundle, watches the sources, and after a change rebuilds only
//! the entries whose dependency graph contains the changed file. Builds run
//! in a separate worker process and land atomically, so a failed build never
//! disturbs what the browser is being served. Connected pages learn about
//! new builds over WebSocket, SSE or polling and reload once.
//!
//! # Architecture
//!
//! - [`config`] - layered configuration (defaults, `plugdev.toml`, `.env`,
//!   environment, flags)
//! - [`manifest`] - typed manifest, entry extraction, validation
//! - [`dev`] - scheduler, engine, worker protocol, live hub, HTTP server
//! - [`bundle`] - the worker's side: running the bundler per entry
//! - [`release`] - release builds and the build-and-upload watch loop
//! - [`error`] - error types with actionable hints
//! - [`logger`] - console and dev-log tracing layers
//! - [`ui`] - terminal output
//!
//! # Example
//!
//! ```rust,no_run
//! use plugdev_cli::dev::{ChangeScheduler, SchedulePolicy};
//! use plugdev_cli::config::DevMode;
//! use std::time::Duration;
//! use tokio::time::Instant;
//!
//! let policy = SchedulePolicy::new(DevMode::Lazy, Duration::from_secs(60), Duration::from_millis(200));
//! let mut scheduler = ChangeScheduler::new(policy);
//! scheduler.on_source_change("desktop/index.js", Instant::now());
//! assert!(scheduler.next_wake().is_some());
//! ```

pub mod bundle;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dev;
pub mod error;
pub mod logger;
pub mod manifest;
pub mod release;
pub mod ui;

// Re-export commonly used types
pub use error::{BuildError, CliError, ConfigError, ManifestError, Result, ResultExt};
