//! Core data types shared across the hook: severities, verdicts, and the
//! wire shapes exchanged with the host assistant.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Review severity, totally ordered from harmless to blocking.
///
/// The ordinal is load-bearing: "max severity across reviewers", consensus
/// spread arithmetic, and the weighted vote all rely on `Ok < Low < Medium <
/// High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Ok,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity from reviewer text. Case-insensitive; anything
    /// unrecognized maps to `Ok` so a malformed reply can never block.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Severity::Low,
            "MEDIUM" => Severity::Medium,
            "HIGH" => Severity::High,
            "CRITICAL" => Severity::Critical,
            _ => Severity::Ok,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Contiguous ordinal, `OK=0 .. CRITICAL=4`.
    pub fn score(&self) -> i64 {
        *self as i64
    }

    /// Map an ordinal back to a severity, clamping out-of-range scores.
    pub fn from_score(score: i64) -> Self {
        match score.clamp(0, 4) {
            0 => Severity::Ok,
            1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding reported by a reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub description: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            description: description.into(),
            severity,
            location: None,
            suggestion: None,
        }
    }
}

/// A reviewer's structured opinion after one call.
///
/// Invariant: `success == false` implies `severity == Ok` and empty issues —
/// a failed reviewer never contributes findings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Verdict {
    #[serde(rename = "adapter")]
    pub adapter_name: String,
    pub severity: Severity,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing)]
    pub raw_text: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub is_self_review: bool,
}

impl Verdict {
    /// A failed call. Severity and issues are forced to their neutral values.
    pub fn failure(adapter_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            severity: Severity::Ok,
            issues: Vec::new(),
            raw_text: String::new(),
            success: false,
            error: Some(error.into()),
            duration_ms: 0,
            is_self_review: false,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Todo item status as reported by the host assistant.
///
/// Unknown strings deserialize as `Pending`: an unrecognized status must
/// never count as completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    InProgress,
    Completed,
    #[default]
    #[serde(other)]
    Pending,
}

/// One tracked sub-task from the assistant's todo list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Todo {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: TodoStatus,
}

impl Todo {
    pub fn is_completed(&self) -> bool {
        self.status == TodoStatus::Completed
    }
}

/// Tool payload carried inside [`HookInput`]. Only the fields the hook
/// recognizes are modeled; everything else is ignored.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolInput {
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub old_string: Option<String>,
    #[serde(default)]
    pub new_string: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// What the host assistant delivers on stdin.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HookInput {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: ToolInput,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub cwd: Option<String>,
}

fn default_session_id() -> String {
    "unknown".to_string()
}

/// The single JSON object written to stdout. Exactly these two keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookOutput {
    #[serde(rename = "continue")]
    pub should_continue: bool,
    #[serde(rename = "systemMessage")]
    pub system_message: String,
}

impl HookOutput {
    pub fn pass_through() -> Self {
        Self {
            should_continue: true,
            system_message: String::new(),
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            system_message: text.into(),
        }
    }
}

/// Context assembled once per orchestration and handed to every reviewer.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    pub session_id: String,
    pub todos: Vec<Todo>,
    pub combined_intent: String,
    pub original_request: String,
    pub message_count: usize,
    pub cwd: String,
    /// Stage-review fields. `code` and `diff` are masked before they reach
    /// this struct; adapters embed them as-is.
    pub file_path: Option<String>,
    pub diff: Option<String>,
    pub code: Option<String>,
    pub user_request: Option<String>,
}
