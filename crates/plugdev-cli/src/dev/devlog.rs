//! Append-only JSON-lines development log.
//!
//! Every line is one object: `{"ts": <ISO 8601>, "level": ..., "message": ...}`
//! plus whatever fields the producer attached. Records come from two places:
//! the server's own tracing events (through [`DevLogLayer`]) and browser
//! payloads posted to `/__devlog`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

#[derive(Debug)]
pub struct DevLog {
    path: PathBuf,
    file: Mutex<File>,
    write_failed: AtomicBool,
}

impl DevLog {
    /// Open (creating directories as needed) for appending.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            write_failed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. A `ts` field is added when missing.
    pub fn append(&self, mut record: Map<String, Value>) -> io::Result<()> {
        if !record.contains_key("ts") {
            record.insert("ts".to_string(), Value::String(now_iso()));
        }
        let mut line = serde_json::to_string(&Value::Object(record)).map_err(io::Error::other)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Append a server-side record. Failures are reported once on stderr
    /// and otherwise ignored.
    pub fn log(&self, level: &str, message: &str, fields: Map<String, Value>) {
        let mut record = Map::new();
        record.insert("ts".to_string(), Value::String(now_iso()));
        record.insert("level".to_string(), Value::String(level.to_string()));
        record.insert("message".to_string(), Value::String(message.to_string()));
        for (key, value) in fields {
            record.entry(key).or_insert(value);
        }

        if let Err(err) = self.append(record) {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                eprintln!("Failed to write dev log {}: {}", self.path.display(), err);
            }
        }
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Where the tracing layer finds the sink once configuration is known.
pub type DevLogSlot = Arc<RwLock<Option<Arc<DevLog>>>>;

/// Mirrors tracing events into the [`DevLog`] in the slot, if any.
pub struct DevLogLayer {
    slot: DevLogSlot,
}

impl DevLogLayer {
    pub fn new(slot: DevLogSlot) -> Self {
        Self { slot }
    }
}

impl<S: Subscriber> Layer<S> for DevLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(sink) = self.slot.read().clone() else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let mut fields = visitor.fields;
        fields.insert(
            "target".to_string(),
            Value::String(metadata.target().to_string()),
        );
        sink.log(
            &metadata.level().as_str().to_ascii_lowercase(),
            &visitor.message,
            fields,
        );
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    fn lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_append_adds_timestamp() {
        let temp = TempDir::new().unwrap();
        let log = DevLog::open(temp.path().join("logs/dev.log")).unwrap();

        let mut record = Map::new();
        record.insert("message".to_string(), Value::from("hello"));
        log.append(record).unwrap();

        let written = lines(log.path());
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["message"], "hello");
        assert!(written[0]["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_log_keeps_own_fields() {
        let temp = TempDir::new().unwrap();
        let log = DevLog::open(temp.path().join("dev.log")).unwrap();

        let mut fields = Map::new();
        fields.insert("level".to_string(), Value::from("spoofed"));
        fields.insert("entry".to_string(), Value::from("desktop/index.js"));
        log.log("info", "Rebuilt", fields);
        log.log("warn", "Second", Map::new());

        let written = lines(log.path());
        assert_eq!(written.len(), 2);
        assert_eq!(written[0]["level"], "info");
        assert_eq!(written[0]["entry"], "desktop/index.js");
        assert_eq!(written[1]["message"], "Second");
    }

    #[test]
    fn test_layer_mirrors_events() {
        let temp = TempDir::new().unwrap();
        let slot: DevLogSlot = Arc::default();
        let subscriber = tracing_subscriber::registry().with(DevLogLayer::new(slot.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before the sink exists");
            *slot.write() = Some(Arc::new(DevLog::open(temp.path().join("dev.log")).unwrap()));
            tracing::warn!(entry = "desktop/index.js", files = 3u64, "Build failed");
        });

        let written = lines(&temp.path().join("dev.log"));
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["level"], "warn");
        assert_eq!(written[0]["message"], "Build failed");
        assert_eq!(written[0]["entry"], "desktop/index.js");
        assert_eq!(written[0]["files"], 3);
        assert!(written[0]["target"].as_str().unwrap().starts_with("plugdev_cli"));
    }
}
