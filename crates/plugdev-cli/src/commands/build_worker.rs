//! Child side of the worker protocol: one request in, one reply line out.

use std::fs;
use std::io::{self, Read, Write};

use crate::bundle;
use crate::cli::BuildWorkerArgs;
use crate::dev::worker::{BuildWorkerReply, BuildWorkerRequest};
use crate::error::{CliError, Result, ResultExt};

/// Run one batch. Returns whether every entry compiled; the caller turns
/// `false` into exit code 1.
pub fn execute(args: BuildWorkerArgs) -> Result<bool> {
    let payload = match &args.request {
        Some(path) => fs::read(path).with_path(path)?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let request: BuildWorkerRequest = serde_json::from_slice(&payload)
        .map_err(|e| CliError::InvalidArgument(format!("Malformed build worker request: {e}")))?;

    tracing::debug!(
        entries = request.indices.len(),
        out_dir = %request.out_dir.display(),
        full = request.empty_out_dir,
        "Build worker started"
    );
    let reply = bundle::run(&request);
    let ok = matches!(reply, BuildWorkerReply::Ok { .. });

    let line = serde_json::to_string(&reply)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(ok)
}
