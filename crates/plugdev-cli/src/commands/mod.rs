//! Command implementations.
//!
//! - [`dev`] - dev server with incremental rebuilds and live reload
//! - [`validate`] - manifest validation report
//! - [`build`] - release build and package, optionally uploaded
//! - [`deploy_watch`] - build and upload after every change
//! - [`build_worker`] - the isolated child side of a build

pub mod build;
pub mod build_worker;
pub mod deploy_watch;
pub mod dev;
pub mod validate;

pub use build::execute as build_execute;
pub use build_worker::execute as build_worker_execute;
pub use deploy_watch::execute as deploy_watch_execute;
pub use dev::execute as dev_execute;
pub use validate::execute as validate_execute;

use std::path::{Path, PathBuf};

use crate::error::{CliError, Result, ResultExt};

/// `--cwd` made absolute, or the process working directory.
pub(crate) fn resolve_cwd(cwd: Option<&Path>) -> Result<PathBuf> {
    let current = std::env::current_dir().context("Failed to read the working directory")?;
    let Some(cwd) = cwd else {
        return Ok(current);
    };
    let cwd = if cwd.is_absolute() {
        cwd.to_path_buf()
    } else {
        current.join(cwd)
    };
    if !cwd.is_dir() {
        return Err(CliError::FileNotFound(cwd));
    }
    Ok(path_clean::clean(cwd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        assert_eq!(resolve_cwd(Some(temp.path())).unwrap(), temp.path());
        assert!(resolve_cwd(None).unwrap().is_absolute());
        assert!(matches!(
            resolve_cwd(Some(&temp.path().join("missing"))),
            Err(CliError::FileNotFound(_))
        ));
    }
}
