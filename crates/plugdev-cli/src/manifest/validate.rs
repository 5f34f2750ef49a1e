//! Manifest validation.

use std::path::Path;

use serde_json::Value;

use crate::config::ValidateMode;
use crate::error::ManifestError;
use crate::manifest::{Manifest, is_remote};

/// Outcome of one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Apply a validation mode: `warn` demotes errors to warnings, `off`
    /// drops everything, `strict` turns errors into a [`ManifestError`].
    pub fn enforce(mut self, mode: ValidateMode) -> Result<Self, ManifestError> {
        match mode {
            ValidateMode::Off => Ok(Self::default()),
            ValidateMode::Warn => {
                let errors = std::mem::take(&mut self.errors);
                self.warnings.extend(errors);
                Ok(self)
            }
            ValidateMode::Strict if self.is_valid() => Ok(self),
            ValidateMode::Strict => Err(validation_failure(&self)),
        }
    }
}

/// The strict-mode error for a report with errors.
pub fn validation_failure(report: &ValidationReport) -> ManifestError {
    ManifestError::Invalid {
        errors: report
            .errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Checks a raw manifest before it is used.
pub trait ManifestValidator: Send + Sync {
    /// `manifest_dir` is the directory relative references resolve against.
    fn validate(&self, manifest: &Value, manifest_dir: &Path) -> ValidationReport;
}

/// JSON Schema check against the typed manifest model, plus a warning for
/// every referenced local file that does not exist.
pub struct SchemaValidator {
    schema: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new() -> Result<Self, ManifestError> {
        let schema = serde_json::to_value(schemars::schema_for!(Manifest))
            .map_err(|e| ManifestError::Schema(e.to_string()))?;
        let schema =
            jsonschema::validator_for(&schema).map_err(|e| ManifestError::Schema(e.to_string()))?;
        Ok(Self { schema })
    }
}

impl ManifestValidator for SchemaValidator {
    fn validate(&self, manifest: &Value, manifest_dir: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();
        for error in self.schema.iter_errors(manifest) {
            report.errors.push(error.to_string());
        }

        for (field, reference) in local_references(manifest) {
            if !manifest_dir.join(&reference).exists() {
                report
                    .warnings
                    .push(format!("{field}: file not found: {reference}"));
            }
        }
        report
    }
}

/// `(field, reference)` for every local file the manifest points at.
fn local_references(manifest: &Value) -> Vec<(String, String)> {
    let mut refs = Vec::new();
    let mut push = |field: String, value: &Value| {
        if let Some(reference) = value.as_str() {
            if !reference.trim().is_empty() && !is_remote(reference) {
                refs.push((field, reference.replace('\\', "/")));
            }
        }
    };

    if let Some(icon) = manifest.get("icon") {
        push("icon".to_string(), icon);
    }
    for section in ["desktop", "mobile", "config"] {
        let Some(body) = manifest.get(section) else {
            continue;
        };
        for list in ["js", "css"] {
            if let Some(items) = body.get(list).and_then(Value::as_array) {
                for item in items {
                    push(format!("{section}.{list}"), item);
                }
            }
        }
        if section == "config" {
            if let Some(html) = body.get("html") {
                push("config.html".to_string(), html);
            }
        }
    }
    refs
}
