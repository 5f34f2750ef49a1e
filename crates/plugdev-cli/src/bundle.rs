//! Child side of the build worker.
//!
//! Runs the configured bundler once per requested entry, in parallel on the
//! rayon pool, and reads each entry's metafile to learn which modules went
//! into it.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use rayon::prelude::*;

use crate::dev::worker::{BuildWorkerReply, BuildWorkerRequest, EntryDependencies, EntryFailure};
use crate::manifest::EntryInfo;

/// Scratch directory for metafiles, removed before the reply is sent.
const META_DIR: &str = ".meta";

struct Compiled {
    module_paths: Vec<String>,
    warnings: Vec<String>,
}

/// Compile every requested entry. Never panics on bundler failures; they
/// become `failed` replies.
pub fn run(request: &BuildWorkerRequest) -> BuildWorkerReply {
    let meta_dir = request.out_dir.join(META_DIR);
    if let Err(err) = prepare_dirs(request, &meta_dir) {
        return BuildWorkerReply::Failed {
            failures: request
                .targets()
                .map(|entry| EntryFailure {
                    index: entry.index,
                    entry: entry.relative_path.clone(),
                    message: format!("{err:#}"),
                })
                .collect(),
        };
    }

    let targets: Vec<&EntryInfo> = request.targets().collect();
    let results: Vec<(&EntryInfo, anyhow::Result<Compiled>)> = targets
        .par_iter()
        .map(|entry| (*entry, compile_entry(request, entry, &meta_dir)))
        .collect();

    let _ = fs::remove_dir_all(&meta_dir);

    let mut failures: Vec<EntryFailure> = request
        .indices
        .iter()
        .filter(|&&index| !request.entries.iter().any(|e| e.index == index))
        .map(|&index| EntryFailure {
            index,
            entry: format!("#{index}"),
            message: "no entry with this index".to_string(),
        })
        .collect();
    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    for (entry, result) in results {
        match result {
            Ok(compiled) => {
                tracing::debug!(
                    entry = %entry.relative_path,
                    modules = compiled.module_paths.len(),
                    "Entry compiled"
                );
                warnings.extend(
                    compiled
                        .warnings
                        .into_iter()
                        .map(|w| format!("{}: {}", entry.relative_path, w)),
                );
                entries.push(EntryDependencies {
                    index: entry.index,
                    entry: entry.relative_path.clone(),
                    module_paths: compiled.module_paths,
                });
            }
            Err(err) => failures.push(EntryFailure {
                index: entry.index,
                entry: entry.relative_path.clone(),
                message: format!("{err:#}"),
            }),
        }
    }

    if failures.is_empty() {
        entries.sort_by_key(|e| e.index);
        BuildWorkerReply::Ok { entries, warnings }
    } else {
        failures.sort_by_key(|f| f.index);
        BuildWorkerReply::Failed { failures }
    }
}

fn prepare_dirs(request: &BuildWorkerRequest, meta_dir: &Path) -> anyhow::Result<()> {
    if request.empty_out_dir && request.out_dir.exists() {
        fs::remove_dir_all(&request.out_dir)
            .with_context(|| format!("failed to empty {}", request.out_dir.display()))?;
    }
    fs::create_dir_all(request.out_dir.join("js"))
        .with_context(|| format!("failed to create {}", request.out_dir.display()))?;
    fs::create_dir_all(meta_dir)
        .with_context(|| format!("failed to create {}", meta_dir.display()))?;
    Ok(())
}

fn compile_entry(
    request: &BuildWorkerRequest,
    entry: &EntryInfo,
    meta_dir: &Path,
) -> anyhow::Result<Compiled> {
    let output = request.out_dir.join(entry.output_file());
    let metafile = meta_dir.join(format!("{}.json", entry.output_name()));

    let vars = [
        ("input", entry.absolute_path.to_string_lossy().into_owned()),
        ("output", output.to_string_lossy().into_owned()),
        ("metafile", metafile.to_string_lossy().into_owned()),
        ("name", entry.output_name()),
        ("root", request.plugin_root.to_string_lossy().into_owned()),
        ("version", request.version.clone()),
        ("port", request.port.to_string()),
    ];
    let argv: Vec<String> = request
        .bundler
        .command
        .iter()
        .map(|arg| expand_template(arg, &vars))
        .collect();
    let Some((program, args)) = argv.split_first() else {
        bail!("bundler.command is empty");
    };

    if !entry.absolute_path.exists() {
        bail!("entry file not found: {}", entry.absolute_path.display());
    }

    let out = Command::new(program)
        .args(args)
        .current_dir(&request.plugin_root)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to run bundler `{program}`"))?;

    let stderr = String::from_utf8_lossy(&out.stderr);
    let warnings = filter_diagnostics(&stderr, &request.bundler.suppress_warnings);

    if !out.status.success() {
        bail!("bundler exited with {}\n{}", out.status, warnings.join("\n"));
    }
    if !output.exists() {
        bail!("bundler succeeded but did not write {}", output.display());
    }

    let module_paths = if metafile.exists() {
        read_metafile(&metafile, &request.plugin_root)?
    } else {
        tracing::debug!(entry = %entry.relative_path, "No metafile written; tracking the entry file only");
        vec![entry.absolute_path.to_string_lossy().replace('\\', "/")]
    };

    Ok(Compiled {
        module_paths,
        warnings,
    })
}

/// Replace `{name}` placeholders. Unknown placeholders are left alone.
pub fn expand_template(arg: &str, vars: &[(&str, String)]) -> String {
    let mut out = arg.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Bundler stderr lines worth showing. A line is dropped when it is blank
/// or names a suppressed warning code (`MODULE_LEVEL_DIRECTIVE` also
/// matches esbuild's `module-level-directive`).
pub fn filter_diagnostics(stderr: &str, suppressed: &[String]) -> Vec<String> {
    let codes: Vec<String> = suppressed.iter().map(|c| canonical_code(c)).collect();
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            let canonical = canonical_code(line);
            !codes.iter().any(|code| canonical.contains(code.as_str()))
        })
        .map(str::to_string)
        .collect()
}

fn canonical_code(text: &str) -> String {
    text.to_ascii_lowercase().replace('_', "-")
}

/// Module paths from an esbuild-style metafile (`{"inputs": {path: ...}}`).
/// Relative keys are resolved against `root`; namespaced ids are kept raw.
pub fn read_metafile(path: &Path, root: &Path) -> anyhow::Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let meta: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("invalid metafile {}", path.display()))?;
    let inputs = meta
        .get("inputs")
        .and_then(|v| v.as_object())
        .with_context(|| format!("metafile {} has no inputs", path.display()))?;

    let paths: BTreeSet<String> = inputs.keys().map(|key| resolve_input(root, key)).collect();
    Ok(paths.into_iter().collect())
}

fn resolve_input(root: &Path, key: &str) -> String {
    let slashed = key.replace('\\', "/");
    let namespaced = slashed
        .split_once(':')
        .is_some_and(|(prefix, _)| prefix.len() > 1 && !prefix.contains('/'));
    if namespaced || slashed.starts_with('\0') || Path::new(&slashed).is_absolute() {
        return slashed;
    }
    root.join(&slashed).to_string_lossy().replace('\\', "/")
}
