//! Served output and its staging directory.
//!
//! The worker always writes into a fresh staging directory. Only a fully
//! successful batch is committed to the served directory, so a failed build
//! leaves the served files byte-for-byte as they were.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirs {
    /// Served under `/__static`
    pub live: PathBuf,
    pub staging: PathBuf,
}

impl OutputDirs {
    pub fn new(live: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            live: live.into(),
            staging: staging.into(),
        }
    }

    /// Start a batch from an empty staging directory.
    pub fn prepare_staging(&self) -> Result<(), BuildError> {
        remove_if_exists(&self.staging).map_err(|source| BuildError::Output {
            path: self.staging.clone(),
            source,
        })?;
        fs::create_dir_all(&self.staging).map_err(|source| BuildError::Output {
            path: self.staging.clone(),
            source,
        })
    }

    /// Publish staging. A full rebuild replaces the served directory, an
    /// incremental one moves the rebuilt files over the served ones.
    /// Returns the number of files published.
    pub fn commit(&self, full: bool) -> Result<usize, BuildError> {
        let published = count_files(&self.staging).map_err(|source| BuildError::Output {
            path: self.staging.clone(),
            source,
        })?;

        if full {
            self.swap_in()?;
        } else {
            merge_into(&self.staging, &self.live).map_err(|source| BuildError::Output {
                path: self.live.clone(),
                source,
            })?;
            remove_if_exists(&self.staging).map_err(|source| BuildError::Output {
                path: self.staging.clone(),
                source,
            })?;
        }
        Ok(published)
    }

    /// Throw staging away after a failed batch.
    pub fn discard(&self) {
        if let Err(err) = remove_if_exists(&self.staging) {
            tracing::debug!(path = %self.staging.display(), error = %err, "Failed to remove staging directory");
        }
    }

    /// [`Self::prepare_staging`] on the blocking pool.
    pub async fn prepare_staging_async(&self) -> Result<(), BuildError> {
        let dirs = self.clone();
        on_blocking_pool(move || dirs.prepare_staging()).await
    }

    /// [`Self::commit`] on the blocking pool.
    pub async fn commit_async(&self, full: bool) -> Result<usize, BuildError> {
        let dirs = self.clone();
        on_blocking_pool(move || dirs.commit(full)).await
    }

    /// [`Self::discard`] on the blocking pool.
    pub async fn discard_async(&self) {
        let dirs = self.clone();
        let discarded = on_blocking_pool(move || {
            dirs.discard();
            Ok(())
        })
        .await;
        if let Err(err) = discarded {
            tracing::debug!(error = %err, "Staging cleanup did not run");
        }
    }

    fn swap_in(&self) -> Result<(), BuildError> {
        let retired = self.live.with_extension("old");
        let output_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| BuildError::Output { path, source }
        };

        remove_if_exists(&retired).map_err(output_err(&retired))?;
        if self.live.exists() {
            fs::rename(&self.live, &retired).map_err(output_err(&self.live))?;
        }
        if let Some(parent) = self.live.parent() {
            fs::create_dir_all(parent).map_err(output_err(parent))?;
        }
        if let Err(source) = fs::rename(&self.staging, &self.live) {
            // Put the previous output back so something is still served.
            if retired.exists() {
                let _ = fs::rename(&retired, &self.live);
            }
            return Err(BuildError::Output {
                path: self.live.clone(),
                source,
            });
        }
        remove_if_exists(&retired).map_err(output_err(&retired))
    }
}

async fn on_blocking_pool<T, F>(job: F) -> Result<T, BuildError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BuildError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| BuildError::Custom(format!("output task failed: {err}")))?
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn count_files(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

fn merge_into(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            merge_into(&entry.path(), &target)?;
        } else if fs::rename(entry.path(), &target).is_err() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dirs(temp: &TempDir) -> OutputDirs {
        OutputDirs::new(
            temp.path().join("dist/.dev-build"),
            temp.path().join("dist/.dev-build.staging"),
        )
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_full_commit_replaces_live() {
        let temp = TempDir::new().unwrap();
        let out = dirs(&temp);
        write(&out.live.join("js/stale.js"), "old");

        out.prepare_staging().unwrap();
        write(&out.staging.join("js/index.js"), "new");
        assert_eq!(out.commit(true).unwrap(), 1);

        assert_eq!(fs::read_to_string(out.live.join("js/index.js")).unwrap(), "new");
        assert!(!out.live.join("js/stale.js").exists());
        assert!(!out.staging.exists());
        assert!(!out.live.with_extension("old").exists());
    }

    #[test]
    fn test_incremental_commit_keeps_other_entries() {
        let temp = TempDir::new().unwrap();
        let out = dirs(&temp);
        write(&out.live.join("js/index.js"), "index v1");
        write(&out.live.join("js/config.js"), "config v1");

        out.prepare_staging().unwrap();
        write(&out.staging.join("js/index.js"), "index v2");
        out.commit(false).unwrap();

        assert_eq!(fs::read_to_string(out.live.join("js/index.js")).unwrap(), "index v2");
        assert_eq!(fs::read_to_string(out.live.join("js/config.js")).unwrap(), "config v1");
        assert!(!out.staging.exists());
    }

    #[test]
    fn test_discard_leaves_live_untouched() {
        let temp = TempDir::new().unwrap();
        let out = dirs(&temp);
        write(&out.live.join("js/index.js"), "served");

        out.prepare_staging().unwrap();
        write(&out.staging.join("js/index.js"), "half-written");
        out.discard();

        assert_eq!(fs::read_to_string(out.live.join("js/index.js")).unwrap(), "served");
        assert!(!out.staging.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_async_commit_from_a_single_threaded_runtime() {
        let temp = TempDir::new().unwrap();
        let out = dirs(&temp);
        write(&out.live.join("js/config.js"), "config v1");
        write(&out.staging.join("js/leftover.js"), "x");

        out.prepare_staging_async().await.unwrap();
        assert!(!out.staging.join("js/leftover.js").exists());
        write(&out.staging.join("js/index.js"), "index v2");
        assert_eq!(out.commit_async(false).await.unwrap(), 1);

        assert_eq!(fs::read_to_string(out.live.join("js/index.js")).unwrap(), "index v2");
        assert_eq!(fs::read_to_string(out.live.join("js/config.js")).unwrap(), "config v1");

        out.prepare_staging_async().await.unwrap();
        out.discard_async().await;
        assert!(!out.staging.exists());
    }

    #[test]
    fn test_prepare_staging_clears_leftovers() {
        let temp = TempDir::new().unwrap();
        let out = dirs(&temp);
        write(&out.staging.join("js/leftover.js"), "x");

        out.prepare_staging().unwrap();
        assert_eq!(fs::read_dir(&out.staging).unwrap().count(), 0);
    }
}
