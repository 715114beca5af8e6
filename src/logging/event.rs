//! logging::event
//!
//! The NDJSON event sink: one JSON object per line, written into a per-run
//! file. Per §4.1 this is the authoritative machine surface - `hello`,
//! phase start/end, gate progress, and a terminating `result` record.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

/// One NDJSON record. `kind` is the event discriminant (`"hello"`,
/// `"phase_start"`, `"phase_end"`, `"gate"`, `"result"`); `fields` are
/// merged alongside it.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: String,
    #[serde(flatten)]
    pub fields: Value,
}

impl Event {
    pub fn new(kind: &str, fields: Value) -> Self {
        Event {
            kind: kind.to_string(),
            fields,
        }
    }

    pub fn hello(mode: &str, issue_id: Option<&str>) -> Self {
        Event::new(
            "hello",
            serde_json::json!({ "mode": mode, "issue_id": issue_id }),
        )
    }

    pub fn phase_start(phase: &str) -> Self {
        Event::new("phase_start", serde_json::json!({ "phase": phase }))
    }

    pub fn phase_end(phase: &str, ok: bool) -> Self {
        Event::new(
            "phase_end",
            serde_json::json!({ "phase": phase, "ok": ok }),
        )
    }

    pub fn gate(name: &str, ok: bool, detail: Option<&str>) -> Self {
        Event::new(
            "gate",
            serde_json::json!({ "name": name, "ok": ok, "detail": detail }),
        )
    }

    pub fn result(
        ok: bool,
        fail_stage: Option<&str>,
        fail_reason: Option<&str>,
        commit_sha: Option<&str>,
    ) -> Self {
        Event::new(
            "result",
            serde_json::json!({
                "ok": ok,
                "fail_stage": fail_stage,
                "fail_reason": fail_reason,
                "commit_sha": commit_sha,
            }),
        )
    }
}

/// A per-run NDJSON file. Optional: the engine is functionally complete
/// without it (§4.1: "optional").
pub struct EventSink {
    file: File,
}

impl EventSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(EventSink {
            file: File::create(path)?,
        })
    }

    pub fn emit(&mut self, event: &Event) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(self.file, "{line}");
            let _ = self.file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_as_one_json_object_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut sink = EventSink::create(&path).unwrap();
        sink.emit(&Event::hello("workspace", Some("42")));
        sink.emit(&Event::phase_start("PREFLIGHT"));
        sink.emit(&Event::phase_end("PREFLIGHT", true));
        sink.emit(&Event::result(true, None, None, Some("abc123")));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "hello");
        assert_eq!(first["issue_id"], "42");
    }
}
