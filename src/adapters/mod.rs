//! Review adapters: the capability set every reviewer provides, plus the
//! shared prompt assembly for external reviewers.
//!
//! Two variants exist. The self-review adapter does no I/O and emits a
//! prompt for the host assistant to execute. External adapters wrap one
//! vendor each and surface every failure as a failed [`Verdict`] — `review`
//! never errors.

pub mod copilot;
pub mod gemini;
pub mod self_review;
pub mod verdict;

use std::time::Duration;

use async_trait::async_trait;

use crate::types::{ReviewContext, Verdict};

pub use copilot::CopilotAdapter;
pub use gemini::GeminiAdapter;
pub use self_review::SelfReviewAdapter;

/// The capability set of a reviewer.
#[async_trait]
pub trait ReviewAdapter: Send + Sync {
    /// Stable identifier, used for quota tracking and vote weights.
    fn name(&self) -> &str;

    fn is_self_review(&self) -> bool {
        false
    }

    /// How long one `review` call may block.
    fn timeout(&self) -> Duration;

    /// Quick local check: key present, binary present. No network.
    fn available(&self) -> bool;

    /// Produce a verdict for the given prompt and context. Must not error;
    /// transport problems, timeouts, and bad replies all come back as
    /// `success == false`.
    async fn review(&self, prompt: &str, context: &ReviewContext) -> Verdict;
}

/// Fixed response-format block appended to every external prompt, demanding
/// the structured verdict shape the parser expects.
const RESPONSE_FORMAT: &str = r#"
## Response format
Respond with exactly this JSON shape:
```json
{
  "severity": "OK|LOW|MEDIUM|HIGH|CRITICAL",
  "issues": [
    {
      "description": "what is wrong",
      "severity": "OK|LOW|MEDIUM|HIGH|CRITICAL",
      "location": "file:line (optional)",
      "suggestion": "how to fix it (optional)"
    }
  ]
}
```
"#;

/// Concatenate the stage prompt with the recognized context fields. `code`
/// and `diff` arrive pre-masked.
pub(crate) fn build_external_prompt(base_prompt: &str, context: &ReviewContext) -> String {
    let mut parts = vec![base_prompt.to_string()];

    if let Some(file_path) = &context.file_path {
        parts.push(format!("\n## File\n{file_path}"));
    }
    if let Some(diff) = &context.diff {
        parts.push(format!("\n## Change\n```\n{diff}\n```"));
    }
    if let Some(code) = &context.code {
        parts.push(format!("\n## Code\n```\n{code}\n```"));
    }
    if let Some(user_request) = &context.user_request {
        parts.push(format!("\n## User request\n{user_request}"));
    }

    parts.push(RESPONSE_FORMAT.to_string());
    parts.join("\n")
}
