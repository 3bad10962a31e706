use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const REDACTED_KEYS: [&str; 5] = ["api_key", "authorization", "image", "control_image", "data"];

/// Append-only JSONL log of one operation's stage transitions.
///
/// Every line carries `type`, `operation_id` and `ts`; the caller payload is
/// merged after them. Credentials and inline image data are replaced with
/// `<omitted>` before anything touches disk.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    operation_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, operation_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                operation_id: operation_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Writer with a fresh random operation id.
    pub fn for_new_operation(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn operation_id(&self) -> &str {
        &self.inner.operation_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let header = [
            ("type", event_type.to_string()),
            ("operation_id", self.inner.operation_id.clone()),
            ("ts", now_utc_iso()),
        ];
        let event = header
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .chain(scrub(payload))
            .collect::<EventPayload>();
        self.append(&event)?;
        Ok(Value::Object(event))
    }

    fn append(&self, event: &EventPayload) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        if let Some(parent) = self.inner.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// Replaces credential and image fields with `<omitted>`, at any depth.
fn scrub(fields: EventPayload) -> EventPayload {
    fields
        .into_iter()
        .map(|(key, value)| {
            let value = if REDACTED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                Value::String("<omitted>".to_string())
            } else {
                scrub_value(value)
            };
            (key, value)
        })
        .collect()
}

fn scrub_value(value: Value) -> Value {
    match value {
        Value::Array(rows) => Value::Array(rows.into_iter().map(scrub_value).collect()),
        Value::Object(fields) => Value::Object(scrub(fields)),
        other => other,
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
