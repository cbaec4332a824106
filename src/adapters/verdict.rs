//! Reply parsing: turn a reviewer's textual answer into a structured
//! [`Verdict`].
//!
//! The primary path extracts a JSON object (bare, or wrapped in a fenced
//! code block) and validates it. When that fails the reply is scanned for
//! severity keywords instead. The parser never errors; something well-formed
//! always comes out.

use regex::Regex;
use serde_json::Value;

use crate::types::{Issue, Severity, Verdict};

/// Keyword classes scanned in descending severity order; first match wins.
const CRITICAL_TERMS: [&str; 3] = ["critical", "vulnerability", "security flaw"];
const HIGH_TERMS: [&str; 3] = ["high", "bug", "error"];
const MEDIUM_TERMS: [&str; 2] = ["medium", "improvement"];
const LOW_TERMS: [&str; 2] = ["low", "minor"];

/// Parse a reviewer reply. `success` is always true: a reply that reached
/// the parser is a completed call, however malformed its content.
pub fn parse_reply(adapter_name: &str, reply: &str) -> Verdict {
    match parse_structured(adapter_name, reply) {
        Some(verdict) => verdict,
        None => parse_keywords(adapter_name, reply),
    }
}

fn parse_structured(adapter_name: &str, reply: &str) -> Option<Verdict> {
    let candidate = extract_json_block(reply).unwrap_or(reply);
    let data: Value = serde_json::from_str(candidate).ok()?;
    let obj = data.as_object()?;

    let severity = obj
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse)
        .unwrap_or(Severity::Ok);

    let issues = obj
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_issue).collect())
        .unwrap_or_default();

    Some(Verdict {
        adapter_name: adapter_name.to_string(),
        severity,
        issues,
        raw_text: candidate.to_string(),
        success: true,
        error: None,
        duration_ms: 0,
        is_self_review: false,
    })
}

fn parse_issue(item: &Value) -> Option<Issue> {
    let obj = item.as_object()?;
    Some(Issue {
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        severity: obj
            .get("severity")
            .and_then(Value::as_str)
            .map(Severity::parse)
            .unwrap_or(Severity::Ok),
        location: obj
            .get("location")
            .and_then(Value::as_str)
            .map(str::to_string),
        suggestion: obj
            .get("suggestion")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Pull the first `{...}` out of a fenced code block, if any.
fn extract_json_block(reply: &str) -> Option<&str> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static pattern");
    fence
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Fallback: infer a severity from the reply text and wrap the whole reply
/// in one synthetic issue.
fn parse_keywords(adapter_name: &str, reply: &str) -> Verdict {
    let lower = reply.to_lowercase();
    let contains_any = |terms: &[&str]| terms.iter().any(|t| lower.contains(t));

    let severity = if contains_any(&CRITICAL_TERMS) {
        Severity::Critical
    } else if contains_any(&HIGH_TERMS) {
        Severity::High
    } else if contains_any(&MEDIUM_TERMS) {
        Severity::Medium
    } else if contains_any(&LOW_TERMS) {
        Severity::Low
    } else {
        Severity::Ok
    };

    Verdict {
        adapter_name: adapter_name.to_string(),
        severity,
        issues: vec![Issue::new(reply.to_string(), severity)],
        raw_text: reply.to_string(),
        success: true,
        error: None,
        duration_ms: 0,
        is_self_review: false,
    }
}
