//! Build worker protocol and the process-isolated invoker.
//!
//! The dev server never compiles in-process. Each build spawns
//! `plugdev build-worker`, writes one [`BuildWorkerRequest`] as JSON to its
//! stdin and reads one [`BuildWorkerReply`] from its stdout. A batch succeeds
//! only when the worker exits cleanly and the reply accounts for every
//! requested entry; anything else fails the whole batch.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::BundlerSection;
use crate::error::BuildError;
use crate::manifest::EntryInfo;

/// Everything the worker needs to compile a subset of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildWorkerRequest {
    pub plugin_root: PathBuf,
    /// Staging directory; compiled files land in `<out_dir>/js/`
    pub out_dir: PathBuf,
    /// All entries, so indices stay stable across requests
    pub entries: Vec<EntryInfo>,
    /// Indices into `entries` to compile
    pub indices: Vec<usize>,
    /// Full rebuild: start from an empty output directory
    pub empty_out_dir: bool,
    pub version: String,
    pub port: u16,
    pub bundler: BundlerSection,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub quiet: bool,
}

impl BuildWorkerRequest {
    /// Entries selected by `indices`, in request order. Unknown indices are
    /// skipped.
    pub fn targets(&self) -> impl Iterator<Item = &EntryInfo> {
        self.indices
            .iter()
            .filter_map(|&index| self.entries.iter().find(|e| e.index == index))
    }
}

/// Module membership of one compiled entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDependencies {
    pub index: usize,
    /// Relative path of the entry, the graph key
    pub entry: String,
    pub module_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub index: usize,
    pub entry: String,
    pub message: String,
}

/// The single line the worker prints on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BuildWorkerReply {
    Ok {
        entries: Vec<EntryDependencies>,
        #[serde(default)]
        warnings: Vec<String>,
    },
    Failed {
        failures: Vec<EntryFailure>,
    },
}

/// A successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub dependencies: Vec<EntryDependencies>,
    /// Bundler diagnostics that were not suppressed
    pub warnings: Vec<String>,
}

/// Runs one batch in isolation.
#[async_trait]
pub trait BuildWorker: Send + Sync {
    async fn build(&self, request: BuildWorkerRequest) -> Result<BuildOutcome, BuildError>;
}

/// Accept an `ok` reply only if it covers every requested index.
pub fn check_reply(
    request: &BuildWorkerRequest,
    entries: Vec<EntryDependencies>,
    warnings: Vec<String>,
) -> Result<BuildOutcome, BuildError> {
    let missing: Vec<String> = request
        .indices
        .iter()
        .filter(|&&index| !entries.iter().any(|e| e.index == index))
        .map(|&index| {
            request
                .entries
                .iter()
                .find(|e| e.index == index)
                .map(|e| e.relative_path.clone())
                .unwrap_or_else(|| format!("#{index}"))
        })
        .collect();

    if !missing.is_empty() {
        return Err(BuildError::MissingEntries(missing));
    }
    Ok(BuildOutcome {
        dependencies: entries,
        warnings,
    })
}

/// Find the reply among the worker's stdout lines. The last line that
/// parses wins, so stray output from the bundler does not break the
/// protocol.
pub fn parse_reply(stdout: &str) -> Option<BuildWorkerReply> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

fn format_failures(failures: &[EntryFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.entry, f.message.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    const MAX_LINES: usize = 20;
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(MAX_LINES)..].join("\n")
}

/// Kills the worker's process group when dropped, unless the worker exited
/// on its own. Covers timeouts and aborted build tasks alike.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; a group that is already gone
    // yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        tracing::debug!(pgid, "Killed build worker process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Spawns the current executable's `build-worker` subcommand per batch.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Worker that re-runs this very binary.
    pub fn current_exe(timeout: Option<Duration>) -> std::io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            vec!["build-worker".to_string()],
            timeout,
        ))
    }
}

#[async_trait]
impl BuildWorker for ProcessWorker {
    async fn build(&self, request: BuildWorkerRequest) -> Result<BuildOutcome, BuildError> {
        let payload =
            serde_json::to_vec(&request).map_err(|e| BuildError::Protocol(e.to_string()))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Bundlers started by the worker join its group, so one signal
        // reaches all of them.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(BuildError::Spawn)?;
        let mut group = GroupGuard::new(child.id());

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BuildError::Protocol("worker stdin is not piped".to_string()))?;
        stdin.write_all(&payload).await.map_err(BuildError::Spawn)?;
        stdin.shutdown().await.map_err(BuildError::Spawn)?;
        drop(stdin);

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| BuildError::TimedOut(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(BuildError::Spawn)?;
        group.disarm();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let reply = parse_reply(&stdout);
        tracing::debug!(
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "Build worker exited"
        );

        match (output.status.success(), reply) {
            (true, Some(BuildWorkerReply::Ok { entries, warnings })) => {
                check_reply(&request, entries, warnings)
            }
            (_, Some(BuildWorkerReply::Failed { failures })) => Err(BuildError::Exited {
                code: output.status.code(),
                detail: format_failures(&failures),
            }),
            (true, None) => Err(BuildError::Protocol(format!(
                "no reply on stdout{}",
                match stderr_tail(&output.stderr) {
                    tail if tail.is_empty() => String::new(),
                    tail => format!("; stderr:\n{tail}"),
                }
            ))),
            (false, _) => Err(BuildError::Exited {
                code: output.status.code(),
                detail: stderr_tail(&output.stderr),
            }),
        }
    }
}
