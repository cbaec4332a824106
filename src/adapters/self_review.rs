//! Self-review adapter: no I/O, no external cost.
//!
//! Builds a structured self-critique prompt that the orchestrator hands back
//! to the host assistant; the actual review happens in the assistant's next
//! turn. The two prompt variants are data resources so they can change
//! without touching code.

use std::time::Duration;

use async_trait::async_trait;

use super::ReviewAdapter;
use crate::types::{ReviewContext, Severity, Todo, Verdict};

const SUBAGENT_TEMPLATE: &str = include_str!("prompts/self_review_subagent.txt");
const CHECKLIST_TEMPLATE: &str = include_str!("prompts/self_review_checklist.txt");

/// Intent text is clipped before it is embedded in the prompt.
const MAX_INTENT_CHARS: usize = 3000;

/// The subagent variant embeds a shorter excerpt inside its nested prompt.
const MAX_SUBAGENT_INTENT_CHARS: usize = 1500;

pub struct SelfReviewAdapter {
    use_subagent: bool,
}

impl SelfReviewAdapter {
    pub fn new(use_subagent: bool) -> Self {
        Self { use_subagent }
    }

    fn build_message(&self, context: &ReviewContext) -> String {
        let intent = if context.combined_intent.is_empty() {
            &context.original_request
        } else {
            &context.combined_intent
        };
        let intent = clip(intent, MAX_INTENT_CHARS);
        let todos = format_todos(&context.todos);

        if self.use_subagent {
            SUBAGENT_TEMPLATE
                .replace("{intent}", &clip(&intent, MAX_SUBAGENT_INTENT_CHARS))
                .replace("{todos}", &todos)
                .replace("{cwd}", &context.cwd)
        } else {
            CHECKLIST_TEMPLATE
                .replace("{intent}", &intent)
                .replace("{todos}", &todos)
        }
    }
}

#[async_trait]
impl ReviewAdapter for SelfReviewAdapter {
    fn name(&self) -> &str {
        "claude_self"
    }

    fn is_self_review(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        // prompt construction only; the value is never awaited on
        Duration::from_secs(1)
    }

    fn available(&self) -> bool {
        true
    }

    async fn review(&self, _prompt: &str, context: &ReviewContext) -> Verdict {
        Verdict {
            adapter_name: self.name().to_string(),
            severity: Severity::Ok,
            issues: Vec::new(),
            raw_text: self.build_message(context),
            success: true,
            error: None,
            duration_ms: 0,
            is_self_review: true,
        }
    }
}

/// Numbered todo list with completion markers.
pub(crate) fn format_todos(todos: &[Todo]) -> String {
    if todos.is_empty() {
        return "(none)".to_string();
    }
    todos
        .iter()
        .enumerate()
        .map(|(i, todo)| {
            let marker = if todo.is_completed() { "[x]" } else { "[ ]" };
            format!("{}. {} {}", i + 1, marker, todo.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}\n\n[... truncated ...]")
}
