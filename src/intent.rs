//! User-intent extraction from the assistant's transcript.
//!
//! Produces a bounded summary of what the user actually asked for, so
//! reviewers can judge the work against the request rather than against the
//! todo list alone. Any problem reading the transcript yields an empty
//! summary; intent is advisory and must never fail an orchestration.

use std::path::Path;

use serde_json::Value;

/// Hard cap on `combined_intent`, in characters (roughly 2.5k tokens).
const MAX_CHARS: usize = 10_000;

const SEPARATOR: &str = "\n\n---\n\n";

/// Headroom reserved for the elision marker when truncating.
const ELISION_SLACK: usize = 100;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentSummary {
    /// The first user message, verbatim.
    pub original_request: String,
    /// All user messages joined, subject to [`MAX_CHARS`].
    pub combined_intent: String,
    pub message_count: usize,
    pub truncated: bool,
}

pub struct IntentExtractor;

impl IntentExtractor {
    /// Extract the user's intent from a transcript file. The transcript is a
    /// JSON array of messages, or an object with a `messages` field.
    pub fn extract(&self, transcript_path: &Path) -> IntentSummary {
        let content = match std::fs::read_to_string(transcript_path) {
            Ok(content) => content,
            Err(_) => return IntentSummary::default(),
        };
        let data: Value = match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(_) => return IntentSummary::default(),
        };

        let messages = user_messages(&data);
        if messages.is_empty() {
            return IntentSummary::default();
        }

        let full_length: usize = messages.iter().map(|m| char_len(m)).sum::<usize>()
            + char_len(SEPARATOR) * (messages.len() - 1);
        let combined = combine_with_limit(&messages);

        IntentSummary {
            original_request: messages[0].clone(),
            message_count: messages.len(),
            truncated: full_length > MAX_CHARS,
            combined_intent: combined,
        }
    }
}

/// Keep user/human messages only. Structured content keeps its text parts,
/// joined with newlines; empty messages are dropped after trimming.
fn user_messages(transcript: &Value) -> Vec<String> {
    let entries = match transcript {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => match map.get("messages") {
            Some(Value::Array(entries)) => entries.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter(|msg| {
            matches!(
                msg.get("role").and_then(Value::as_str),
                Some("user") | Some("human")
            )
        })
        .filter_map(|msg| message_text(msg.get("content")?))
        .collect()
}

fn message_text(content: &Value) -> Option<String> {
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Join messages under the cap. When over budget: the first message (the
/// original request) is always kept in full, then messages are appended from
/// the end, newest first, while they fit; the gap is marked with an elision
/// note. A first message that alone exceeds the cap is cut to the cap.
fn combine_with_limit(messages: &[String]) -> String {
    let combined = messages.join(SEPARATOR);
    if char_len(&combined) <= MAX_CHARS {
        return combined;
    }

    let first = &messages[0];
    let remaining = MAX_CHARS
        .saturating_sub(char_len(first))
        .saturating_sub(ELISION_SLACK);

    let mut kept: Vec<&str> = Vec::new();
    let mut kept_len = 0usize;
    for msg in messages[1..].iter().rev() {
        let sep_cost = if kept.is_empty() { 0 } else { char_len(SEPARATOR) };
        if kept_len + sep_cost + char_len(msg) >= remaining {
            break;
        }
        kept_len += sep_cost + char_len(msg);
        kept.insert(0, msg);
    }

    if kept.is_empty() {
        return truncate_chars(first, MAX_CHARS);
    }

    let omitted = messages.len() - 1 - kept.len();
    format!(
        "{}\n\n[... {} earlier message(s) elided ...]\n\n{}",
        first,
        omitted,
        kept.join(SEPARATOR)
    )
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
