//! telemetry.rs
//!
//! JSONL telemetry sink for the control loop.
//!
//! One JSON object is written per iteration, plus a final Q-table
//! snapshot when the loop stops. Telemetry is controlled entirely via
//! environment variables and never fails the loop: an unopenable or
//! unwritable file switches the sink off.
//!
//! # Environment variables
//!
//! - `QROUTE_TELEMETRY_MODE`: `"off"` (default) or `"jsonl"`.
//! - `QROUTE_TELEMETRY_PATH`: JSONL file. Required when mode is `"jsonl"`.
//! - `QROUTE_TELEMETRY_APPEND`: `"1"`/`"true"`/`"yes"` appends instead of
//!   truncating.
//!
//! Every record carries `"schema_version": 1` and a `"kind"` tag
//! (`"iteration"` or `"q_table"`).

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::Serialize;

use crate::rl::QTableSnapshot;
use crate::types::{LatencyMs, NUM_TARGETS};

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    Off,
    Jsonl,
}

impl TelemetryMode {
    pub fn from_env() -> Self {
        match env::var("QROUTE_TELEMETRY_MODE") {
            Ok(s) => match s.to_lowercase().as_str() {
                "jsonl" => TelemetryMode::Jsonl,
                _ => TelemetryMode::Off,
            },
            Err(_) => TelemetryMode::Off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub path: Option<PathBuf>,
    pub append: bool,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let mode = TelemetryMode::from_env();
        let path = if mode == TelemetryMode::Jsonl {
            env::var("QROUTE_TELEMETRY_PATH").ok().map(PathBuf::from)
        } else {
            None
        };
        TelemetryConfig {
            mode,
            path,
            append: Self::append_from_env(),
        }
    }

    /// JSONL to `path`, truncating.
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        TelemetryConfig {
            mode: TelemetryMode::Jsonl,
            path: Some(path.into()),
            append: false,
        }
    }

    pub fn append_from_env() -> bool {
        env::var("QROUTE_TELEMETRY_APPEND")
            .ok()
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// Outcome of one loop iteration as recorded in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPhase {
    Learned,
    SkippedLearn,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub schema_version: i64,
    pub kind: &'static str,
    pub ts: String,
    pub iteration: u64,
    pub outcome: IterationPhase,
    pub state: String,
    pub next_state: Option<String>,
    pub action_index: usize,
    pub weights: [u32; NUM_TARGETS],
    pub actuation_ok: bool,
    /// Epsilon after this iteration.
    pub epsilon: f64,
    pub reward: Option<f64>,
    pub q_value: Option<f64>,
    pub latencies_ms: Option<[LatencyMs; NUM_TARGETS]>,
    pub observe_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct QTableRecord<'a> {
    schema_version: i64,
    kind: &'static str,
    ts: String,
    iterations: u64,
    epsilon: f64,
    table: &'a QTableSnapshot,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// When mode is Off every method is a no-op. The file is opened lazily
/// on first write.
pub struct TelemetrySink {
    mode: TelemetryMode,
    path: Option<PathBuf>,
    append: bool,
    writer: Option<BufWriter<File>>,
}

impl TelemetrySink {
    pub fn from_env() -> Self {
        Self::from_config(TelemetryConfig::from_env())
    }

    pub fn from_config(cfg: TelemetryConfig) -> Self {
        TelemetrySink {
            mode: cfg.mode,
            path: cfg.path,
            append: cfg.append,
            writer: None,
        }
    }

    pub fn off() -> Self {
        Self::from_config(TelemetryConfig {
            mode: TelemetryMode::Off,
            path: None,
            append: false,
        })
    }

    fn ensure_writer(&mut self) -> Option<&mut BufWriter<File>> {
        if self.mode != TelemetryMode::Jsonl {
            return None;
        }
        if self.writer.is_none() {
            let Some(path) = self.path.clone() else {
                self.mode = TelemetryMode::Off;
                return None;
            };
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let mut options = OpenOptions::new();
            options.create(true).write(true);
            if self.append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            match options.open(&path) {
                Ok(file) => self.writer = Some(BufWriter::new(file)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "telemetry disabled");
                    self.mode = TelemetryMode::Off;
                    return None;
                }
            }
        }
        self.writer.as_mut()
    }

    pub fn log_record<T: Serialize + ?Sized>(&mut self, record: &T) {
        if self.mode != TelemetryMode::Jsonl {
            return;
        }
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        let Some(writer) = self.ensure_writer() else {
            return;
        };
        if writeln!(writer, "{line}").is_err() {
            self.mode = TelemetryMode::Off;
            self.writer = None;
        }
    }

    pub fn log_iteration(&mut self, record: &IterationRecord) {
        self.log_record(record);
    }

    pub fn log_q_table(&mut self, iterations: u64, epsilon: f64, table: &QTableSnapshot) {
        let record = QTableRecord {
            schema_version: SCHEMA_VERSION,
            kind: "q_table",
            ts: now_rfc3339(),
            iterations,
            epsilon,
            table,
        };
        self.log_record(&record);
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::QTable;
    use serde_json::Value as JsonValue;

    #[test]
    fn off_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        let mut sink = TelemetrySink::from_config(TelemetryConfig {
            mode: TelemetryMode::Off,
            path: Some(path.clone()),
            append: false,
        });
        sink.log_record(&serde_json::json!({"a": 1}));
        sink.flush();
        assert!(!path.exists());
    }

    #[test]
    fn q_table_snapshot_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("t.jsonl");
        let mut sink = TelemetrySink::from_config(TelemetryConfig::jsonl(&path));
        sink.log_q_table(3, 0.5, &QTable::new(7).snapshot());
        sink.flush();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: JsonValue = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["kind"], "q_table");
        assert_eq!(value["table"]["rows"].as_array().map(|r| r.len()), Some(27));
    }
}
