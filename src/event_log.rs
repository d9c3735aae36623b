//! Append-only JSON-lines audit log. One record per webhook or action.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogRecord {
    pub ts: String,
    pub event: String,
    pub call_sid: String,
    pub recording_sid: String,
    pub from: String,
    pub to: String,
    pub duration: u32,
    pub transcript: String,
    pub detail: serde_json::Value,
}

impl EventLogRecord {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            ts: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            event: event.into(),
            detail: serde_json::Value::Object(Default::default()),
            ..Default::default()
        }
    }

    /// Attach one step outcome under `detail.<key>`.
    pub fn detail(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        if !self.detail.is_object() {
            self.detail = serde_json::Value::Object(Default::default());
        }
        if let Some(map) = self.detail.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}

pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single write. Failures are logged, never surfaced.
    pub async fn record(&self, record: &EventLogRecord) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize event record");
                return;
            }
        };
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await;
        match file {
            Ok(mut file) => {
                if let Err(e) = file.write_all(&line).await {
                    error!(error = %e, path = %self.path.display(), "failed to append event record");
                }
            }
            Err(e) => error!(error = %e, path = %self.path.display(), "failed to open event log"),
        }
    }

    /// Up to `max_lines` most recent records, newest first. Unparseable lines are skipped.
    pub async fn read_recent(&self, max_lines: usize) -> Vec<EventLogRecord> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, "failed to read event log");
                }
                return Vec::new();
            }
        };
        raw.lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(max_lines)
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}
