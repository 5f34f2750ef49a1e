//! Error types for the plugdev CLI.
//!
//! The hierarchy mirrors how failures are treated at runtime:
//! - **`ConfigError`** is fatal at startup and always carries a hint.
//! - **`ManifestError`** is fatal before the server starts in strict mode, and
//!   only aborts the current rebuild once the server is running.
//! - **`BuildError`** never stops the watch loop; the previous output keeps
//!   being served.
//!
//! `CliError` wraps all of them and is converted to a `miette::Report` in
//! `main`.
//!
//! # Example
//!
//! ```rust,no_run
//! use plugdev_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_manifest(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Set PLUGIN_ROOT if the plugin lives elsewhere")
//! }
//! ```

mod report;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use report::cli_error_to_miette;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration-related errors (bad durations, missing entries, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Manifest loading or validation errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Build worker failures
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Invalid command-line arguments or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Development server errors
    #[error("Server error: {0}")]
    Server(String),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Certificate provider failures
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Dev plugin packaging failures
    #[error("Packaging error: {0}")]
    Package(String),

    /// Plugin upload failures
    #[error("Upload error: {0}")]
    Upload(String),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Explicitly requested config file doesn't exist
    #[error("Config file not found: {}\n\nHint: Create plugdev.toml at the repository root or pass --config <path>", .0.display())]
    NotFound(PathBuf),

    /// A duration string that does not match `<number>[ms|s|m|h]`
    #[error("Invalid duration for '{field}': {value:?}\n\nHint: Use a positive number with an optional unit, e.g. 200ms, 45s, 5m, 2h")]
    InvalidDuration {
        /// Name of the field
        field: String,
        /// The rejected input
        value: String,
    },

    /// Missing required configuration field
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: String,
        /// Helpful hint for providing the field
        hint: String,
    },

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },

    /// The manifest declares no local script entries
    #[error("No local script entries in {}\n\nHint: Add .js files to desktop.js, mobile.js or config.js in the manifest", .0.display())]
    NoEntries(PathBuf),

    /// Two entries would be written to the same output file
    #[error("Entries '{first}' and '{second}' both compile to js/{name}.js\n\nHint: Rename one of the entry files")]
    OutputCollision {
        /// Output stem shared by both entries
        name: String,
        /// First entry (manifest order)
        first: String,
        /// Second entry
        second: String,
    },

    /// I/O error while reading config
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Manifest loading and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read
    #[error("Failed to read manifest {}: {source}\n\nHint: Check PLUGIN_ROOT or paths.manifest in plugdev.toml", .path.display())]
    Read {
        /// Manifest location
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The manifest is not valid JSON or has the wrong shape
    #[error("Failed to parse manifest {}: {source}", .path.display())]
    Parse {
        /// Manifest location
        path: PathBuf,
        /// Underlying error
        source: serde_json::Error,
    },

    /// The JSON Schema for the manifest model could not be compiled
    #[error("Manifest schema unavailable: {0}")]
    Schema(String),

    /// Validation reported errors in strict mode
    #[error("Manifest validation failed:\n{errors}\n\nHint: Fix the errors above or set MANIFEST_VALIDATE=warn")]
    Invalid {
        /// One error per line
        errors: String,
    },
}

/// Build worker errors. Each one fails the whole batch.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The worker process could not be started
    #[error("Failed to start build worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker exited unsuccessfully
    #[error("Build worker exited with {}{}", .code.map(|c| format!("code {c}")).unwrap_or_else(|| "a signal".to_string()), format_detail(.detail))]
    Exited {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Per-entry failure messages or captured stderr
        detail: String,
    },

    /// The worker's reply could not be understood
    #[error("Malformed build worker reply: {0}")]
    Protocol(String),

    /// The reply does not account for every requested entry
    #[error("Build worker reply is missing entries: {}", .0.join(", "))]
    MissingEntries(Vec<String>),

    /// The worker did not finish in time and was killed
    #[error("Build worker timed out after {}s\n\nHint: Raise dev.worker_timeout or set it to 0 to disable the limit", .0.as_secs())]
    TimedOut(Duration),

    /// Committing the staged output failed
    #[error("Failed to update output {}: {source}", .path.display())]
    Output {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Generic build error
    #[error("{0}")]
    Custom(String),
}

fn format_detail(detail: &str) -> String {
    if detail.trim().is_empty() {
        String::new()
    } else {
        format!(":\n{}", detail.trim_end())
    }
}

/// Result type alias using `CliError` as the default error type.
pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Turn a `NotFound` I/O error into [`CliError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Append a `Hint:` line to the error message.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the error message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                CliError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}: {}", msg, err))
        })
    }
}
