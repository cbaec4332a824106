//! Reviewer debate: escalate disagreement into additional rounds, detect
//! consensus, and fall back to a weighted vote.
//!
//! A debate round is a value — a snapshot of verdicts handed from engine to
//! orchestrator to audit sink. Rounds ≥ 2 show every reviewer the others'
//! current opinions before asking for a fresh verdict.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::ReviewAdapter;
use crate::config::HookConfig;
use crate::executor::{FanOutExecutor, ReviewJob};
use crate::types::{ReviewContext, Severity, Verdict};

/// Outcome of a debate: the verdicts of the last round played, whether they
/// converged, and the severity the orchestrator should act on.
#[derive(Debug, Clone)]
pub struct DebateRound {
    pub round_num: u32,
    pub verdicts: Vec<Verdict>,
    pub consensus_reached: bool,
    pub final_severity: Option<Severity>,
}

pub struct DebateEngine {
    enabled: bool,
    max_rounds: u32,
    trigger_on_disagreement: bool,
    trigger_on_high: bool,
    weights: HashMap<String, f64>,
}

impl DebateEngine {
    pub fn from_config(config: &HookConfig) -> Self {
        Self {
            enabled: config.debate.enabled,
            max_rounds: config.debate.max_rounds,
            trigger_on_disagreement: config.debate.trigger_on_disagreement,
            trigger_on_high: config.debate.trigger_on_high_severity,
            weights: config.conflict_resolution.weights.clone(),
        }
    }

    /// Whether round-1 verdicts warrant a debate, and why. Self-review and
    /// failed verdicts never participate.
    pub fn needs_debate(&self, verdicts: &[Verdict]) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }
        let successful: Vec<&Verdict> = verdicts
            .iter()
            .filter(|v| v.success && !v.is_self_review)
            .collect();
        if successful.is_empty() {
            return None;
        }

        if self.trigger_on_high
            && successful
                .iter()
                .any(|v| v.severity >= Severity::High)
        {
            return Some("high severity found");
        }

        if self.trigger_on_disagreement && successful.len() >= 2 {
            let min = successful.iter().map(|v| v.severity.score()).min()?;
            let max = successful.iter().map(|v| v.severity.score()).max()?;
            if max - min >= 2 {
                return Some("significant disagreement");
            }
        }

        None
    }

    /// Run up to `max_rounds` additional rounds, concurrently within each
    /// round, stopping early on consensus. Without consensus the last
    /// round's verdicts go to a weighted vote.
    pub async fn run(
        &self,
        executor: &FanOutExecutor,
        adapters: &[Arc<dyn ReviewAdapter>],
        initial_verdicts: Vec<Verdict>,
        original_prompt: &str,
        context: &ReviewContext,
    ) -> DebateRound {
        let mut current = initial_verdicts;
        let last_round = self.max_rounds + 1;

        for round_num in 2..=last_round {
            let jobs: Vec<ReviewJob> = adapters
                .iter()
                .filter_map(|adapter| {
                    let others: Vec<&Verdict> = current
                        .iter()
                        .filter(|v| v.adapter_name != adapter.name())
                        .collect();
                    if others.is_empty() {
                        return None;
                    }
                    Some(ReviewJob {
                        adapter: Arc::clone(adapter),
                        prompt: build_debate_prompt(original_prompt, &others, round_num),
                    })
                })
                .collect();

            if jobs.is_empty() {
                break;
            }

            current = executor.execute(jobs, context).await;
            tracing::debug!(round = round_num, "debate round completed");

            if let Some(severity) = check_consensus(&current) {
                return DebateRound {
                    round_num,
                    verdicts: current,
                    consensus_reached: true,
                    final_severity: Some(severity),
                };
            }
        }

        let final_severity = self.weighted_vote(&current);
        DebateRound {
            round_num: last_round,
            verdicts: current,
            consensus_reached: false,
            final_severity: Some(final_severity),
        }
    }

    /// Severity→score average weighted per adapter (missing weights count
    /// 1.0), rounded half-to-even, mapped back onto the severity ordinal.
    pub fn weighted_vote(&self, verdicts: &[Verdict]) -> Severity {
        let mut total_weight = 0.0;
        let mut weighted_score = 0.0;

        for verdict in verdicts.iter().filter(|v| v.success) {
            let weight = self
                .weights
                .get(&verdict.adapter_name)
                .copied()
                .unwrap_or(1.0);
            weighted_score += weight * verdict.severity.score() as f64;
            total_weight += weight;
        }

        if total_weight == 0.0 {
            return Severity::Ok;
        }

        let average = weighted_score / total_weight;
        Severity::from_score(round_ties_even(average))
    }
}

/// Consensus: all successful severities equal, or within a one-step spread —
/// resolved to the higher step (escalate on uncertainty).
fn check_consensus(verdicts: &[Verdict]) -> Option<Severity> {
    let scores: Vec<i64> = verdicts
        .iter()
        .filter(|v| v.success)
        .map(|v| v.severity.score())
        .collect();
    let (min, max) = (scores.iter().min()?, scores.iter().max()?);
    if max - min <= 1 {
        Some(Severity::from_score(*max))
    } else {
        None
    }
}

/// The debate prompt: the other reviewers' opinions, then the original
/// request, then instructions to agree or rebut in the structured shape.
pub fn build_debate_prompt(original_prompt: &str, others: &[&Verdict], round_num: u32) -> String {
    format!(
        r#"## Code review debate - round {round_num}

Consider the other reviewers' opinions and reach a final judgment.

### Other reviewers:
{opinions}

### Original review request:
{original_prompt}

### Instructions:
1. Weigh each other reviewer's opinion carefully.
2. If you agree, say why; if you disagree, cite evidence.
3. Decide your final severity and issue list.
4. Add any new issues you have found.

### Response format:
```json
{{
  "severity": "OK|LOW|MEDIUM|HIGH|CRITICAL",
  "agree_with_others": true,
  "reasoning": "why you agree or disagree",
  "issues": [
    {{
      "description": "what is wrong",
      "severity": "...",
      "suggestion": "how to fix it"
    }}
  ]
}}
```
"#,
        opinions = render_opinions(others),
    )
}

fn render_opinions(verdicts: &[&Verdict]) -> String {
    let mut parts = Vec::new();
    for verdict in verdicts {
        parts.push(format!(
            "**{}** (severity: {}):",
            verdict.adapter_name, verdict.severity
        ));
        if verdict.issues.is_empty() {
            parts.push("  (no issues)".to_string());
        } else {
            for issue in &verdict.issues {
                parts.push(format!("  - [{}] {}", issue.severity, issue.description));
                if let Some(suggestion) = &issue.suggestion {
                    parts.push(format!("    -> suggestion: {suggestion}"));
                }
            }
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

/// Human-readable debate summary for the system message.
pub fn render_summary(round: &DebateRound) -> String {
    let consensus = if round.consensus_reached {
        "yes"
    } else {
        "no (weighted vote)"
    };
    let severity = round
        .final_severity
        .unwrap_or(Severity::Ok);

    let mut parts = vec![
        format!("\n### Reviewer debate result (round {})", round.round_num),
        format!("Consensus reached: {consensus}"),
        format!("Final severity: **{severity}**"),
        String::new(),
    ];

    for verdict in round.verdicts.iter().filter(|v| v.success) {
        parts.push(format!("**{}**: {}", verdict.adapter_name, verdict.severity));
        for issue in verdict.issues.iter().take(3) {
            parts.push(format!("  - {}", issue.description));
        }
    }

    parts.join("\n")
}

fn round_ties_even(value: f64) -> i64 {
    let floor = value.floor();
    let fraction = value - floor;
    let floor_int = floor as i64;
    if fraction > 0.5 {
        floor_int + 1
    } else if fraction < 0.5 {
        floor_int
    } else if floor_int % 2 == 0 {
        floor_int
    } else {
        floor_int + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Issue;

    fn verdict(name: &str, severity: Severity) -> Verdict {
        Verdict {
            adapter_name: name.to_string(),
            severity,
            issues: vec![Issue::new("finding", severity)],
            raw_text: String::new(),
            success: true,
            error: None,
            duration_ms: 0,
            is_self_review: false,
        }
    }

    fn engine(enabled: bool) -> DebateEngine {
        let mut config = HookConfig::default();
        config.debate.enabled = enabled;
        DebateEngine::from_config(&config)
    }

    #[test]
    fn test_disabled_never_debates() {
        let engine = engine(false);
        let verdicts = vec![verdict("a", Severity::Ok), verdict("b", Severity::Critical)];
        assert!(engine.needs_debate(&verdicts).is_none());
    }

    #[test]
    fn test_high_severity_triggers() {
        let engine = engine(true);
        assert_eq!(
            engine.needs_debate(&[verdict("a", Severity::High)]),
            Some("high severity found")
        );
        assert_eq!(
            engine.needs_debate(&[verdict("a", Severity::Critical)]),
            Some("high severity found")
        );
    }

    #[test]
    fn test_two_step_spread_triggers() {
        let engine = engine(true);
        let verdicts = vec![verdict("a", Severity::Ok), verdict("b", Severity::Medium)];
        assert_eq!(engine.needs_debate(&verdicts), Some("significant disagreement"));
    }

    #[test]
    fn test_one_step_spread_does_not_trigger() {
        let engine = engine(true);
        let verdicts = vec![verdict("a", Severity::Low), verdict("b", Severity::Medium)];
        assert!(engine.needs_debate(&verdicts).is_none());
    }

    #[test]
    fn test_failed_and_self_verdicts_ignored() {
        let engine = engine(true);
        let mut self_review = verdict("self", Severity::Critical);
        self_review.is_self_review = true;
        let failed = Verdict::failure("b", "down");
        assert!(engine.needs_debate(&[self_review, failed]).is_none());
    }

    #[test]
    fn test_consensus_unanimous() {
        let verdicts = vec![verdict("a", Severity::Medium), verdict("b", Severity::Medium)];
        assert_eq!(check_consensus(&verdicts), Some(Severity::Medium));
    }

    #[test]
    fn test_consensus_one_step_resolves_upward() {
        let verdicts = vec![verdict("a", Severity::Medium), verdict("b", Severity::High)];
        assert_eq!(check_consensus(&verdicts), Some(Severity::High));
    }

    #[test]
    fn test_no_consensus_on_wide_spread() {
        let verdicts = vec![verdict("a", Severity::Ok), verdict("b", Severity::High)];
        assert_eq!(check_consensus(&verdicts), None);
    }

    #[test]
    fn test_weighted_vote_respects_weights() {
        let mut config = HookConfig::default();
        config
            .conflict_resolution
            .weights
            .insert("b".to_string(), 3.0);
        let engine = DebateEngine::from_config(&config);

        // a: OK (w=1), b: HIGH (w=3) → (0 + 9) / 4 = 2.25 → MEDIUM
        let verdicts = vec![verdict("a", Severity::Ok), verdict("b", Severity::High)];
        assert_eq!(engine.weighted_vote(&verdicts), Severity::Medium);
    }

    #[test]
    fn test_weighted_vote_ignores_failures() {
        let engine = engine(true);
        let verdicts = vec![Verdict::failure("a", "down"), Verdict::failure("b", "down")];
        assert_eq!(engine.weighted_vote(&verdicts), Severity::Ok);
    }

    #[test]
    fn test_round_ties_even() {
        assert_eq!(round_ties_even(0.5), 0);
        assert_eq!(round_ties_even(1.5), 2);
        assert_eq!(round_ties_even(2.5), 2);
        assert_eq!(round_ties_even(2.51), 3);
        assert_eq!(round_ties_even(2.49), 2);
        assert_eq!(round_ties_even(3.0), 3);
    }

    #[test]
    fn test_debate_prompt_shows_other_opinions() {
        let a = verdict("gemini", Severity::High);
        let prompt = build_debate_prompt("Review the change.", &[&a], 2);
        assert!(prompt.contains("round 2"));
        assert!(prompt.contains("**gemini** (severity: HIGH):"));
        assert!(prompt.contains("Review the change."));
    }

    #[test]
    fn test_summary_names_round_and_severity() {
        let round = DebateRound {
            round_num: 2,
            verdicts: vec![verdict("a", Severity::High)],
            consensus_reached: true,
            final_severity: Some(Severity::High),
        };
        let summary = render_summary(&round);
        assert!(summary.contains("round 2"));
        assert!(summary.contains("HIGH"));
        assert!(summary.contains("Consensus reached: yes"));
    }
}
