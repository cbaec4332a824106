//! Append-only structured audit log.
//!
//! One JSON object per line, one file per local date. Writes are best-effort:
//! a failed audit append is logged and swallowed, never surfaced to the
//! orchestration.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::types::Severity;

/// Debate metadata attached to a completion event when a debate ran.
#[derive(Debug, Clone, Serialize)]
pub struct DebateAudit {
    pub triggered: bool,
    pub reason: String,
    pub rounds: u32,
    pub consensus_reached: bool,
    pub final_severity: Option<Severity>,
}

/// One orchestration's audit record. Fields not relevant to the event type
/// stay unset and are omitted from the line.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AuditEvent {
    pub event_type: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todo_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_results: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_status: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_decision: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debate: Option<DebateAudit>,
}

impl AuditEvent {
    pub fn new(event_type: &str, session_id: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            session_id: session_id.to_string(),
            ..Self::default()
        }
    }
}

pub struct AuditSink {
    log_dir: PathBuf,
    file_prefix: &'static str,
}

impl AuditSink {
    /// Sink for the completion orchestrator (`completion-audit-*.jsonl`).
    pub fn completion(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_prefix: "completion-audit",
        }
    }

    /// Sink for the stage orchestrator (`audit-*.jsonl`).
    pub fn stage(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            file_prefix: "audit",
        }
    }

    /// Append one event, stamped with the local write time. Best-effort.
    pub async fn log(&self, event: AuditEvent) {
        let path = self.log_dir.join(format!(
            "{}-{}.jsonl",
            self.file_prefix,
            chrono::Local::now().format("%Y-%m-%d")
        ));
        let log_dir = self.log_dir.clone();

        let result = tokio::task::spawn_blocking(move || append_line(&log_dir, &path, &event))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e.to_string())));

        if let Err(e) = result {
            tracing::warn!("audit append failed: {e}");
        }
    }
}

fn append_line(
    log_dir: &std::path::Path,
    path: &std::path::Path,
    event: &AuditEvent,
) -> std::io::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let mut line = serde_json::to_value(event).map_err(std::io::Error::other)?;
    if let Value::Object(map) = &mut line {
        map.insert(
            "timestamp".to_string(),
            Value::from(chrono::Local::now().to_rfc3339()),
        );
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_lines(dir: &std::path::Path, prefix: &str) -> Vec<Value> {
        let path = dir.join(format!(
            "{}-{}.jsonl",
            prefix,
            chrono::Local::now().format("%Y-%m-%d")
        ));
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::completion(dir.path());

        let mut event = AuditEvent::new("completion_review", "s1");
        event.review_count = Some(1);
        event.todo_count = Some(3);
        sink.log(event.clone()).await;
        sink.log(event).await;

        let lines = read_lines(dir.path(), "completion-audit");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "completion_review");
        assert_eq!(lines[0]["session_id"], "s1");
        assert_eq!(lines[0]["review_count"], 1);
        assert!(lines[0]["timestamp"].is_string());
        // irrelevant fields are omitted, not null
        assert!(lines[0].get("debate").is_none());
    }

    #[tokio::test]
    async fn test_creates_log_dir_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep").join("logs");
        let sink = AuditSink::stage(&nested);
        sink.log(AuditEvent::new("stage_review", "s1")).await;
        assert_eq!(read_lines(&nested, "audit").len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_dir_does_not_panic() {
        let sink = AuditSink::completion("/proc/no-such-dir/logs");
        sink.log(AuditEvent::new("completion_review", "s1")).await;
    }
}
