//! Manifest validation command.

use std::path::Path;

use serde_json::Value;

use crate::cli::ValidateArgs;
use crate::commands::resolve_cwd;
use crate::config::{LoadOptions, PlugdevConfig, ValidateMode, process_env};
use crate::error::Result;
use crate::manifest::{Manifest, ManifestValidator, SchemaValidator, ValidationReport};
use crate::ui;

pub async fn execute(args: ValidateArgs) -> Result<()> {
    let cwd = resolve_cwd(args.cwd.as_deref())?;
    let loaded = PlugdevConfig::load(&LoadOptions {
        cwd,
        config_path: args.config.clone(),
        overrides: args.overrides(),
        env: process_env(),
    })?;
    let paths = &loaded.settings.paths;
    let mode = loaded.settings.validate;

    let raw = Manifest::read_raw(&paths.manifest)?;
    let report = check_manifest(&raw, &paths.manifest, &paths.src_root)?;
    ui::print_validation_report(&paths.display_relative(&paths.manifest), &report);

    if mode == ValidateMode::Off {
        ui::info("Validation mode is off; nothing is enforced");
        return Ok(());
    }
    report.enforce(mode)?;
    Ok(())
}

/// Schema validation plus the entry rules the dev server applies: at least
/// one local entry and no output name collisions.
pub fn check_manifest(raw: &Value, manifest_path: &Path, src_root: &Path) -> Result<ValidationReport> {
    let validator = SchemaValidator::new()?;
    let manifest_dir = manifest_path.parent().unwrap_or(src_root);
    let mut report = validator.validate(raw, manifest_dir);

    match Manifest::from_value(manifest_path, raw) {
        Ok(manifest) => {
            if let Err(err) = manifest.entries(src_root, manifest_path) {
                report.errors.push(first_line(&err.to_string()));
            }
        }
        // Schema errors already describe a manifest that does not parse.
        Err(err) if report.is_valid() => report.errors.push(first_line(&err.to_string())),
        Err(_) => {}
    }
    Ok(report)
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn plugin(js: &[&str]) -> (TempDir, Value) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("icon.png"), b"png").unwrap();
        fs::create_dir_all(temp.path().join("desktop")).unwrap();
        fs::write(temp.path().join("desktop/index.js"), "").unwrap();
        let raw = json!({
            "manifest_version": 1,
            "version": "1.0.0",
            "type": "APP",
            "name": {"en": "Demo"},
            "icon": "icon.png",
            "desktop": {"js": js, "css": []}
        });
        (temp, raw)
    }

    #[test]
    fn test_clean_manifest() {
        let (temp, raw) = plugin(&["desktop/index.js"]);
        let report = check_manifest(&raw, &temp.path().join("manifest.json"), temp.path()).unwrap();
        assert!(report.is_valid(), "{report:?}");
        assert!(report.warnings.is_empty(), "{report:?}");
    }

    #[test]
    fn test_no_local_entries_is_an_error() {
        let (temp, raw) = plugin(&["https://cdn.example.com/lib.js"]);
        let report = check_manifest(&raw, &temp.path().join("manifest.json"), temp.path()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("No local script entries"));
    }

    #[test]
    fn test_missing_file_is_a_warning() {
        let (temp, raw) = plugin(&["desktop/index.js", "desktop/missing.js"]);
        let report = check_manifest(&raw, &temp.path().join("manifest.json"), temp.path()).unwrap();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("desktop/missing.js")));
    }
}
