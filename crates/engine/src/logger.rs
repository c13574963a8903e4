//! Bridges driver output onto the bus and the JSONL audit file.
//!
//! One `StreamingLogger` per search. Every observed record is emitted on
//! the session's current bus and appended to the per-search audit file,
//! one JSON object per line with an ISO timestamp; the first line of a
//! file is always the `metadata` record. The child variant re-labels
//! delegated iterations as `sub_iteration` events on the parent bus so
//! SSE clients see nested progress in-band.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use braid_domain::error::Result;
use braid_domain::{EventKind, IterationRecord, RunMetadata};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::bus::BusHandle;
use crate::driver::DriverLogger;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL audit writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only JSONL file, shared between a search's logger and any child
/// loggers spawned by delegation.
pub struct JsonlWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one `{type, timestamp, …fields}` line.
    pub fn append(&self, kind: &str, fields: &Value) {
        let mut entry = json!({
            "type": kind,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Some(obj), Some(extra)) = (entry.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{entry}") {
            tracing::warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamingLogger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StreamingLogger {
    search_id: String,
    query: String,
    bus: BusHandle,
    jsonl: Arc<JsonlWriter>,
    metadata_logged: AtomicBool,
    iteration_count: AtomicU32,
}

impl StreamingLogger {
    pub fn new(
        log_dir: &Path,
        search_id: &str,
        query: &str,
        bus: BusHandle,
    ) -> Result<Self> {
        let jsonl = JsonlWriter::create(&log_dir.join(format!("search_{search_id}.jsonl")))?;
        Ok(Self {
            search_id: search_id.to_string(),
            query: query.to_string(),
            bus,
            jsonl: Arc::new(jsonl),
            metadata_logged: AtomicBool::new(false),
            iteration_count: AtomicU32::new(0),
        })
    }

    pub fn jsonl(&self) -> Arc<JsonlWriter> {
        self.jsonl.clone()
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    // ── Terminal events ───────────────────────────────────────────

    pub fn mark_done(&self, answer: Option<&str>, sources: Value, execution_time: f64) {
        let data = json!({
            "answer": answer,
            "sources": sources,
            "execution_time": execution_time,
        });
        self.bus.emit(EventKind::Done, data.clone());
        self.jsonl.append("done", &data);
    }

    pub fn mark_error(&self, message: &str) {
        let data = json!({ "message": message });
        self.bus.emit(EventKind::Error, data.clone());
        self.jsonl.append("error", &data);
    }

    pub fn mark_cancelled(&self) {
        let data = json!({});
        self.bus.emit(EventKind::Cancelled, data.clone());
        self.jsonl.append("cancelled", &data);
    }
}

impl DriverLogger for StreamingLogger {
    fn log_metadata(&self, meta: &RunMetadata) {
        if self.metadata_logged.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut data = serde_json::to_value(meta).unwrap_or_else(|_| json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert("search_id".into(), json!(self.search_id));
            obj.insert("query".into(), json!(self.query));
        }
        self.bus.emit(EventKind::Metadata, data.clone());
        self.jsonl.append("metadata", &data);
    }

    fn log_iteration(&self, record: &IterationRecord) {
        let n = self.iteration_count.fetch_add(1, Ordering::AcqRel) + 1;
        let mut data = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert("iteration".into(), json!(n));
        }
        self.bus.emit(EventKind::Iteration, data.clone());
        self.jsonl.append("iteration", &data);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChildLogger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logger for a delegated sub-agent. Child iterations surface on the
/// parent bus as `sub_iteration` events and land in the parent's audit
/// file; sub-agents do not emit metadata.
pub struct ChildLogger {
    sub_question: String,
    bus: BusHandle,
    /// The parent's audit file; `None` when the parent has no audit sink.
    jsonl: Option<Arc<JsonlWriter>>,
}

impl ChildLogger {
    pub fn new(sub_question: &str, bus: BusHandle, jsonl: Option<Arc<JsonlWriter>>) -> Self {
        Self {
            sub_question: sub_question.to_string(),
            bus,
            jsonl,
        }
    }
}

impl DriverLogger for ChildLogger {
    fn log_metadata(&self, _meta: &RunMetadata) {}

    fn log_iteration(&self, record: &IterationRecord) {
        let mut data = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
        if let Some(obj) = data.as_object_mut() {
            obj.insert("sub_question".into(), json!(self.sub_question));
        }
        self.bus.emit(EventKind::SubIteration, data.clone());
        if let Some(jsonl) = &self.jsonl {
            jsonl.append("sub_iteration", &data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use braid_domain::CodeBlock;

    fn record() -> IterationRecord {
        IterationRecord {
            prompt: "p".into(),
            response: "r".into(),
            code_blocks: Vec::<CodeBlock>::new(),
            final_answer: None,
            iteration_time: 0.5,
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            root_model: "model-x".into(),
            backend: "anthropic".into(),
            max_iterations: 15,
            max_depth: 1,
            environment: "rhai".into(),
        }
    }

    #[test]
    fn metadata_is_first_jsonl_line_and_logged_once() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusHandle::new(Arc::new(EventBus::new()));
        let logger = StreamingLogger::new(dir.path(), "abc123", "the query", bus.clone()).unwrap();

        logger.log_metadata(&metadata());
        logger.log_metadata(&metadata());
        logger.log_iteration(&record());

        let content = std::fs::read_to_string(logger.jsonl().path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "metadata");
        assert_eq!(first["search_id"], "abc123");
        assert_eq!(first["query"], "the query");
        assert!(first["timestamp"].is_string());
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "iteration");
        assert_eq!(second["iteration"], 1);

        // Bus got exactly one metadata + one iteration event.
        let events = bus.bus().replay();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Metadata);
        assert_eq!(events[1].kind, EventKind::Iteration);
    }

    #[test]
    fn iteration_counter_increments() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusHandle::new(Arc::new(EventBus::new()));
        let logger = StreamingLogger::new(dir.path(), "x", "q", bus.clone()).unwrap();
        logger.log_iteration(&record());
        logger.log_iteration(&record());
        let events = bus.bus().replay();
        assert_eq!(events[0].data["iteration"], 1);
        assert_eq!(events[1].data["iteration"], 2);
    }

    #[test]
    fn terminal_marks_latch_the_bus_and_hit_the_audit_file() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusHandle::new(Arc::new(EventBus::new()));
        let logger = StreamingLogger::new(dir.path(), "x", "q", bus.clone()).unwrap();
        logger.mark_done(Some("answer"), json!([{"id": "1"}]), 2.5);

        assert!(bus.bus().is_done());
        let content = std::fs::read_to_string(logger.jsonl().path()).unwrap();
        let entry: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(entry["type"], "done");
        assert_eq!(entry["answer"], "answer");
        assert_eq!(entry["sources"][0]["id"], "1");
    }

    #[test]
    fn child_logger_emits_sub_iterations_on_parent_bus() {
        let dir = tempfile::tempdir().unwrap();
        let bus = BusHandle::new(Arc::new(EventBus::new()));
        let parent = StreamingLogger::new(dir.path(), "x", "q", bus.clone()).unwrap();
        let child = ChildLogger::new("sub question", bus.clone(), Some(parent.jsonl()));

        child.log_metadata(&metadata());
        child.log_iteration(&record());

        let events = bus.bus().replay();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SubIteration);
        assert_eq!(events[0].data["sub_question"], "sub question");

        // Shares the parent's audit file.
        let content = std::fs::read_to_string(parent.jsonl().path()).unwrap();
        assert!(content.contains("\"sub_iteration\""));
    }
}
